//! 原生 SDK 边界
//!
//! `NativeSdk` 是阻塞式、单线程语义的句柄接口；`NativeHandle` 负责把调用
//! 串行化并放到 `spawn_blocking` 上执行。

pub mod mock;
pub mod models;

pub use mock::{MockControl, MockSdk};
pub use models::*;

use crate::bridge::serialization::CALL_ID_LEN;
use crate::bridge::types::BridgeError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 原生调用错误
///
/// 部分发送失败时原生层已经分配了消息 ID，保留下来用于自动重发。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
    pub message_id: Option<String>,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_id: None,
        }
    }

    pub fn with_message_id(message: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_id: Some(message_id.into()),
        }
    }

    pub fn unsupported(op: &str) -> Self {
        Self::new(format!("{} not supported", op))
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

impl From<NativeError> for BridgeError {
    fn from(e: NativeError) -> Self {
        BridgeError::Native(e.message)
    }
}

/// 原生客户端句柄接口
///
/// 所有方法都可能阻塞；实现者假定同一时刻只有一个调用方。
pub trait NativeSdk: Send {
    fn version(&self) -> SdkVersion;
    fn capabilities(&self) -> u32;
    fn session(&self) -> NativeSession;

    // 认证与信任
    fn register(&mut self, username: &str, password: &str) -> NativeResult<()>;
    fn login(&mut self, username: &str, password: &str) -> NativeResult<()>;
    fn logout(&mut self) -> NativeResult<()>;
    fn relogin(&mut self) -> NativeResult<()>;
    fn heartbeat(&mut self) -> NativeResult<()>;
    fn trust_pending_server(&mut self, pin: &str) -> NativeResult<()>;
    fn trust_pending_peer(&mut self, pin: &str) -> NativeResult<()>;

    // 消息
    fn send(&mut self, target: &str, is_group: bool, payload: &OutgoingPayload)
        -> NativeResult<String>;
    fn resend(
        &mut self,
        target: &str,
        is_group: bool,
        message_id: &str,
        payload: &OutgoingPayload,
    ) -> NativeResult<()>;
    fn send_read_receipt(&mut self, peer: &str, message_id: &str) -> NativeResult<()>;
    fn send_typing(&mut self, peer: &str, typing: bool) -> NativeResult<()>;
    fn send_presence(&mut self, peer: &str, online: bool) -> NativeResult<()>;
    fn poll_events(&mut self, max_events: u32, wait_ms: u32) -> Vec<RawEvent>;

    // 好友
    fn add_friend(&mut self, username: &str, remark: &str) -> NativeResult<()>;
    fn set_friend_remark(&mut self, username: &str, remark: &str) -> NativeResult<()>;
    fn delete_friend(&mut self, username: &str) -> NativeResult<()>;
    fn set_user_blocked(&mut self, username: &str, blocked: bool) -> NativeResult<()>;
    fn send_friend_request(&mut self, username: &str, remark: &str) -> NativeResult<()>;
    fn respond_friend_request(&mut self, username: &str, accept: bool) -> NativeResult<()>;
    fn list_friends(&mut self) -> NativeResult<Vec<FriendEntry>>;
    fn list_friend_requests(&mut self) -> NativeResult<Vec<FriendRequestEntry>>;

    /// 增量同步好友，返回 (列表, 是否有变化)
    fn sync_friends(&mut self) -> NativeResult<(Vec<FriendEntry>, bool)> {
        self.list_friends().map(|list| (list, true))
    }

    // 群组
    fn join_group(&mut self, group_id: &str) -> NativeResult<()>;
    fn leave_group(&mut self, group_id: &str) -> NativeResult<()>;
    fn create_group(&mut self) -> NativeResult<String>;
    fn send_group_invite(&mut self, group_id: &str, peer: &str) -> NativeResult<String>;
    fn list_group_members(&mut self, group_id: &str) -> NativeResult<Vec<GroupMemberEntry>>;
    fn set_group_member_role(&mut self, group_id: &str, peer: &str, role: u32)
        -> NativeResult<()>;
    fn kick_group_member(&mut self, group_id: &str, peer: &str) -> NativeResult<()>;

    fn list_groups(&mut self) -> NativeResult<Vec<GroupEntry>> {
        Ok(Vec::new())
    }

    // 设备
    fn list_devices(&mut self) -> NativeResult<Vec<DeviceEntry>>;
    fn kick_device(&mut self, device_id: &str) -> NativeResult<()>;

    fn begin_device_pairing_primary(&mut self) -> NativeResult<String> {
        Err(NativeError::unsupported("device pairing"))
    }
    fn poll_device_pairing_requests(&mut self) -> NativeResult<Vec<PairingRequestEntry>> {
        Err(NativeError::unsupported("device pairing"))
    }
    fn approve_device_pairing_request(
        &mut self,
        _device_id: &str,
        _request_id_hex: &str,
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("device pairing"))
    }
    fn begin_device_pairing_linked(&mut self, _pairing_code: &str) -> NativeResult<()> {
        Err(NativeError::unsupported("device pairing"))
    }
    fn poll_device_pairing_linked(&mut self) -> NativeResult<bool> {
        Err(NativeError::unsupported("device pairing"))
    }
    fn cancel_device_pairing(&mut self) {}

    // 历史
    fn load_chat_history(
        &mut self,
        conv_id: &str,
        is_group: bool,
        limit: u32,
    ) -> NativeResult<Vec<HistoryEntry>>;
    fn delete_chat_history(
        &mut self,
        conv_id: &str,
        is_group: bool,
        delete_attachments: bool,
        secure_wipe: bool,
    ) -> NativeResult<()>;
    fn set_history_enabled(&mut self, enabled: bool) -> NativeResult<()>;
    fn clear_all_history(&mut self, delete_attachments: bool, secure_wipe: bool)
        -> NativeResult<()>;

    // 附件
    fn store_attachment_preview_bytes(
        &mut self,
        _file_id: &str,
        _file_name: &str,
        _file_size: u64,
        _bytes: &[u8],
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("attachment preview"))
    }
    fn download_chat_file_to_path(
        &mut self,
        file_id: &str,
        file_key: &[u8],
        file_name: &str,
        file_size: u64,
        out_path: &Path,
    ) -> NativeResult<()>;
    fn download_chat_file_to_bytes(
        &mut self,
        _file_id: &str,
        _file_key: &[u8],
        _file_name: &str,
        _file_size: u64,
    ) -> NativeResult<Vec<u8>> {
        Err(NativeError::unsupported("download to bytes"))
    }

    // 媒体
    fn get_media_config(&mut self) -> NativeResult<MediaConfig> {
        Err(NativeError::unsupported("media"))
    }
    fn derive_media_root(&mut self, _peer: &str, _call_id: &[u8]) -> NativeResult<Vec<u8>> {
        Err(NativeError::unsupported("media"))
    }
    fn push_media(&mut self, _peer: &str, _call_id: &[u8], _packet: &[u8]) -> NativeResult<()> {
        Err(NativeError::unsupported("media"))
    }
    fn pull_media(
        &mut self,
        _call_id: &[u8],
        _max_packets: u32,
        _wait_ms: u32,
    ) -> NativeResult<Vec<MediaPacket>> {
        Err(NativeError::unsupported("media"))
    }
    fn push_group_media(
        &mut self,
        _group_id: &str,
        _call_id: &[u8],
        _packet: &[u8],
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("media"))
    }
    fn pull_group_media(
        &mut self,
        _call_id: &[u8],
        _max_packets: u32,
        _wait_ms: u32,
    ) -> NativeResult<Vec<MediaPacket>> {
        Err(NativeError::unsupported("media"))
    }
    fn add_media_subscription(
        &mut self,
        _call_id: &[u8],
        _is_group: bool,
        _group_id: Option<&str>,
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("media"))
    }
    fn clear_media_subscriptions(&mut self) {}

    // 单聊通话
    fn start_peer_call(&mut self, _peer: &str, _video: bool) -> NativeResult<CallDescriptor> {
        Err(NativeError::unsupported("peer call"))
    }
    fn accept_peer_call(
        &mut self,
        _peer: &str,
        _call_id: &[u8; CALL_ID_LEN],
    ) -> NativeResult<CallDescriptor> {
        Err(NativeError::unsupported("peer call"))
    }
    fn decline_peer_call(&mut self, _peer: &str, _call_id: &[u8; CALL_ID_LEN]) -> NativeResult<()> {
        Err(NativeError::unsupported("peer call"))
    }
    fn end_peer_call(&mut self, _peer: &str, _call_id: &[u8; CALL_ID_LEN]) -> NativeResult<()> {
        Err(NativeError::unsupported("peer call"))
    }

    // 群通话
    fn start_group_call(&mut self, group_id: &str, video: bool) -> NativeResult<CallDescriptor>;
    fn join_group_call(
        &mut self,
        group_id: &str,
        call_id: &[u8; CALL_ID_LEN],
        video: bool,
    ) -> NativeResult<CallDescriptor>;
    fn leave_group_call(&mut self, group_id: &str, call_id: &[u8; CALL_ID_LEN])
        -> NativeResult<()>;
    fn get_group_call_key(
        &mut self,
        _group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
        _key_id: u32,
    ) -> NativeResult<Vec<u8>> {
        Err(NativeError::unsupported("group call key"))
    }
    fn rotate_group_call_key(
        &mut self,
        _group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
        _key_id: u32,
        _members: &[String],
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("group call key"))
    }
    fn request_group_call_key(
        &mut self,
        _group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
        _key_id: u32,
        _members: &[String],
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("group call key"))
    }
    fn send_group_call_signal(
        &mut self,
        _group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
        _op: u32,
        _media_flags: u8,
        _key_id: u32,
        _members: &[String],
    ) -> NativeResult<()> {
        Err(NativeError::unsupported("group call signal"))
    }
}

/// 原生客户端工厂
pub trait NativeConnector: Send + Sync {
    fn connect(&self, config_path: &Path) -> NativeResult<Box<dyn NativeSdk>>;
}

/// 没有可用原生库时使用的连接器，总是失败
pub struct UnavailableConnector;

impl NativeConnector for UnavailableConnector {
    fn connect(&self, _config_path: &Path) -> NativeResult<Box<dyn NativeSdk>> {
        Err(NativeError::new("Native SDK not available"))
    }
}

/// 始终返回给定 `MockSdk` 的连接器（供测试与演示使用）
pub struct MockConnector {
    sdk: Mutex<Option<MockSdk>>,
}

impl MockConnector {
    pub fn new(sdk: MockSdk) -> Self {
        Self {
            sdk: Mutex::new(Some(sdk)),
        }
    }
}

impl NativeConnector for MockConnector {
    fn connect(&self, _config_path: &Path) -> NativeResult<Box<dyn NativeSdk>> {
        let mut slot = self
            .sdk
            .lock()
            .map_err(|_| NativeError::new("Native bridge init failed"))?;
        match slot.take() {
            Some(sdk) => Ok(Box::new(sdk)),
            None => Err(NativeError::new("Native bridge init failed")),
        }
    }
}

/// 原生句柄：独占持有 SDK，调用在阻塞线程池上串行执行
#[derive(Clone)]
pub struct NativeHandle {
    sdk: Arc<Mutex<Box<dyn NativeSdk>>>,
}

impl NativeHandle {
    pub fn new(sdk: Box<dyn NativeSdk>) -> Self {
        Self {
            sdk: Arc::new(Mutex::new(sdk)),
        }
    }

    /// 在阻塞线程上执行一次原生调用
    pub async fn call<T, F>(&self, op: &'static str, f: F) -> NativeResult<T>
    where
        F: FnOnce(&mut dyn NativeSdk) -> NativeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let sdk = self.sdk.clone();
        debug!("[Native] 🔧 {}", op);
        tokio::task::spawn_blocking(move || {
            let mut guard = sdk
                .lock()
                .map_err(|_| NativeError::new("native handle poisoned"))?;
            f(guard.as_mut())
        })
        .await
        .map_err(|e| NativeError::new(format!("{} aborted: {}", op, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_connector_fails() {
        let err = UnavailableConnector
            .connect(Path::new("client_config.ini"))
            .err()
            .unwrap();
        assert_eq!(err.message, "Native SDK not available");
    }

    #[tokio::test]
    async fn mock_connector_hands_out_sdk_once() {
        let (sdk, _control) = MockSdk::new();
        let connector = MockConnector::new(sdk);
        assert!(connector.connect(Path::new("x.ini")).is_ok());
        assert!(connector.connect(Path::new("x.ini")).is_err());
    }

    #[tokio::test]
    async fn handle_runs_calls_on_blocking_pool() {
        let (sdk, control) = MockSdk::new();
        let handle = NativeHandle::new(Box::new(sdk));
        handle
            .call("login", |sdk| sdk.login("alice", "pw"))
            .await
            .unwrap();
        let session = handle.call("session", |sdk| Ok(sdk.session())).await.unwrap();
        assert!(!session.token.is_empty());
        assert!(control.calls().iter().any(|c| c == "login:alice"));
    }
}
