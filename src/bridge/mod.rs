pub mod call;
pub mod client;
pub mod config;
pub mod conversation;
pub mod db;
pub mod device;
pub mod dispatch;
pub mod event;
pub mod friend;
pub mod group;
pub mod listener;
pub mod message;
pub mod native;
pub mod outbox;
pub mod poller;
pub mod prefs;
pub mod relay;
pub mod serialization;
pub mod state;
pub mod types;

// 重新导出桥接入口与监听器
pub use client::{BridgeOptions, ClientBridge, MOCK_FALLBACK_STATUS};
pub use listener::{BridgeListener, EmptyBridgeListener};
pub use poller::PollCadence;

// 重新导出对外使用的数据类型
pub use types::{BridgeError, BridgeResult, ConvRef, SessionSnapshot, RECALL_MARKER};
