//! Content moderation: decision engine, outcome messages and the
//! submission pipeline that ties them to the store.

pub mod decision;
pub mod messages;
pub mod pipeline;

pub use decision::{decide, Audit, Decision};
pub use messages::{message_for, ModerationMessage};
pub use pipeline::{
    ModerationOutcome, ModerationPipeline, ModerationState, SubmissionTarget, SubmittedItem,
    MAX_CONTENT_CHARS,
};
