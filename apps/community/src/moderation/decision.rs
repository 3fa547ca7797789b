//! Maps a classifier verdict to a graded moderation action.
//!
//! The action depends on the category alone. Confidence, reasoning and
//! keywords only travel along in the audit payload.

use serde::Serialize;

use crate::classifier::{Category, Verdict};
use crate::models::{FlagLevel, ModerationAction};

/// Recorded as the reasoning when no verdict could be obtained.
pub const UNAVAILABLE_REASONING: &str = "classifier unavailable - pending counselor review";

/// What was known about the content when the decision was made.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Audit {
    /// `None` when the classifier gave no verdict.
    pub category: Option<Category>,
    pub confidence: f32,
    pub reasoning: String,
    pub keywords: Vec<String>,
}

impl Audit {
    /// Category as written to audit trails; `pending` when there was no verdict.
    pub fn category_str(&self) -> &'static str {
        self.category.map_or("pending", Category::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: ModerationAction,
    pub flag_level: FlagLevel,
    pub audit: Audit,
}

/// Decides what happens to a submission. `None` means the classifier failed
/// or timed out, and the content is held for review.
pub fn decide(verdict: Option<&Verdict>) -> Decision {
    let Some(verdict) = verdict else {
        return Decision {
            action: ModerationAction::Pending,
            flag_level: FlagLevel::PendingReview,
            audit: Audit {
                category: None,
                confidence: 0.0,
                reasoning: UNAVAILABLE_REASONING.to_string(),
                keywords: Vec::new(),
            },
        };
    };

    let (action, flag_level) = grade(verdict.category);
    Decision {
        action,
        flag_level,
        audit: Audit {
            category: Some(verdict.category),
            confidence: verdict.confidence,
            reasoning: verdict.reasoning.clone(),
            keywords: verdict.keywords.clone(),
        },
    }
}

fn grade(category: Category) -> (ModerationAction, FlagLevel) {
    match category {
        Category::Safe | Category::Unknown => (ModerationAction::Allow, FlagLevel::Normal),
        Category::MildNegative | Category::SevereDistress => (ModerationAction::FlagMild, FlagLevel::Mild),
        Category::Depression | Category::SelfHarm | Category::Suicide => {
            (ModerationAction::Reject, FlagLevel::Immediate)
        }
        Category::Aggressive => (ModerationAction::Block, FlagLevel::Blocked),
    }
}
