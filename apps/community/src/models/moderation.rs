use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::Category;

/// Graded disposition of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Allow,
    FlagMild,
    Reject,
    Block,
    Pending,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Allow => "allow",
            ModerationAction::FlagMild => "flag_mild",
            ModerationAction::Reject => "reject",
            ModerationAction::Block => "block",
            ModerationAction::Pending => "pending",
        }
    }
}

/// Severity persisted next to content, stored as a small integer (0–4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FlagLevel {
    Normal = 0,
    Mild = 1,
    Immediate = 2,
    Blocked = 3,
    PendingReview = 4,
}

impl FlagLevel {
    pub fn label(self) -> &'static str {
        match self {
            FlagLevel::Normal => "Normal",
            FlagLevel::Mild => "Watch",
            FlagLevel::Immediate => "Needs immediate attention",
            FlagLevel::Blocked => "Blocked",
            FlagLevel::PendingReview => "Pending review",
        }
    }
}

impl From<FlagLevel> for u8 {
    fn from(level: FlagLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for FlagLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FlagLevel::Normal),
            1 => Ok(FlagLevel::Mild),
            2 => Ok(FlagLevel::Immediate),
            3 => Ok(FlagLevel::Blocked),
            4 => Ok(FlagLevel::PendingReview),
            other => Err(format!("flag level out of range: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Post,
    Comment,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
        }
    }
}

/// Audit row for content that counselors must see. `content_id` points at
/// the published row for mild flags and is `None` for rejected content,
/// which is kept only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedContentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_type: ContentType,
    pub content_id: Option<Uuid>,
    pub content: String,
    pub flag_level: FlagLevel,
    pub category: Category,
    pub keywords: Vec<String>,
    pub reasoning: String,
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
}

/// Submission held outside the public feed until a counselor reviews it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingContentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_type: ContentType,
    pub content: String,
    pub image_url: Option<String>,
    /// Target post of a held comment.
    pub post_id: Option<Uuid>,
    pub parent_comment_id: Option<Uuid>,
    pub pending_reason: String,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
}
