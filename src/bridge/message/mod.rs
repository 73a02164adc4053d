pub mod api;
pub mod models;
pub mod service;

pub use models::{
    Attachment, AttachmentKind, ChatMessage, GroupMessage, MessageReaction, MessageStatus,
    PendingDelete, ReplyPreview, TransferState,
};
pub use service::{DeleteOutcome, MessageLog, Recaller};
