pub mod api;
pub mod models;

pub use models::{presence_label, FriendRequestUi, FriendUi};
