use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Active,
    Closed,
}

/// One support room per student. `counselor_id == None` means the room sits
/// in the public pool where any counselor can pick it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub student_id: Uuid,
    pub counselor_id: Option<Uuid>,
    pub status: RoomStatus,
    /// Sort key of the room list. Only ever moves forward.
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn open_for(student_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            student_id,
            counselor_id: None,
            status: RoomStatus::Active,
            last_message_at: now,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(room_id: Uuid, sender_id: Uuid, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content,
            created_at: Utc::now(),
        }
    }
}
