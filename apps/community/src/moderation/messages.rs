use serde::Serialize;

use crate::models::ModerationAction;

/// What the author is told about their submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModerationMessage {
    pub title: &'static str,
    pub message: &'static str,
    /// Offer the author a chat with a counselor.
    pub show_chat_suggestion: bool,
}

pub fn message_for(action: ModerationAction) -> ModerationMessage {
    match action {
        ModerationAction::Block => ModerationMessage {
            title: "Content not allowed",
            message: "Your post contains content that isn't appropriate and can't be published.",
            show_chat_suggestion: false,
        },
        ModerationAction::Reject => ModerationMessage {
            title: "We care about you",
            message: "It looks like you may be going through a difficult time. This post can't be \
                      shared publicly, but we encourage you to talk directly with a counselor \
                      who can support you.",
            show_chat_suggestion: true,
        },
        ModerationAction::Pending => ModerationMessage {
            title: "Awaiting review",
            message: "Your post was submitted and is waiting for a counselor to review it. \
                      You'll be notified once it's approved.",
            show_chat_suggestion: false,
        },
        ModerationAction::FlagMild => ModerationMessage {
            title: "Posted",
            message: "Your post has been published. If you need support, don't hesitate to \
                      reach out to a counselor.",
            show_chat_suggestion: false,
        },
        ModerationAction::Allow => ModerationMessage {
            title: "Posted",
            message: "Your post was published successfully.",
            show_chat_suggestion: false,
        },
    }
}
