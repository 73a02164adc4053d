pub mod api;
pub mod models;
pub mod service;

pub use models::{GroupCallRoomUi, GroupCallState, IncomingCall, PeerCallState};
pub use service::CallBook;
