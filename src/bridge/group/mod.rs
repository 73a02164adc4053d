pub mod api;
pub mod models;

pub use models::{GroupInviteUi, GroupMemberRole, GroupMemberUi, GroupUi};
