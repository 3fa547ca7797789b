pub mod chat;
pub mod moderation;
pub mod notification;
pub mod post;
pub mod user;

pub use chat::{ChatMessage, ChatRoom, RoomStatus};
pub use moderation::{
    ContentType, FlagLevel, FlaggedContentRecord, ModerationAction, PendingContentRecord,
    PendingStatus,
};
pub use notification::{Notification, NotificationKind};
pub use post::{Comment, LikeSet, Post};
pub use user::{Role, UserProfile};
