//! 桥接层的可变状态聚合
//!
//! 所有字段只在 `ClientBridge` 的状态锁内读写。变更通过 `Changes` 记账，
//! 释放锁之前统一取出通知交给监听器。

use crate::bridge::call::CallBook;
use crate::bridge::config::ClientConfig;
use crate::bridge::conversation::ConversationBook;
use crate::bridge::device::{DeviceUi, PairingRequestUi};
use crate::bridge::friend::{FriendRequestUi, FriendUi};
use crate::bridge::group::{GroupInviteUi, GroupMemberUi, GroupUi};
use crate::bridge::listener::Notification;
use crate::bridge::message::MessageLog;
use crate::bridge::native::{
    FriendEntry, FriendRequestEntry, GroupEntry, NativeHandle, NativeSession, PendingPeerTrust,
    PendingServerTrust, SdkVersion,
};
use crate::bridge::outbox::Outbox;
use crate::bridge::poller::PollTask;
use crate::bridge::prefs::{keys, MessagePrefs, PrefsDao, PrivacySettings};
use crate::bridge::relay::{BoundedLog, MediaRelayLog, OfflinePayloadLog};
use crate::bridge::serialization::now_ms;
use crate::bridge::types::{BridgeError, BridgeResult, ConvRef, SessionSnapshot};
use std::collections::{BTreeSet, HashMap};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const NOT_INITIALIZED: &str = "Native SDK not initialized";
pub const NOT_LOGGED_IN: &str = "Not logged in";

/// 待通知的变更
#[derive(Debug, Default)]
struct Changes {
    session: bool,
    conversations: bool,
    messages: BTreeSet<ConvRef>,
    friends: bool,
    friend_requests: bool,
    call_rooms: bool,
    incoming_call: bool,
    trust: bool,
}

pub struct BridgeState {
    // 会话
    pub initialized: bool,
    pub logged_in: bool,
    pub username: String,
    pub token: String,
    pub device_id: String,
    pub last_error: String,
    pub status_message: String,
    pub remote_mode: bool,
    pub remote_ok: bool,
    pub remote_error: String,
    pub is_mock: bool,
    pub sdk_version: SdkVersion,
    pub capabilities: u32,
    pub pending_server_trust: Option<PendingServerTrust>,
    pub pending_peer_trust: Option<PendingPeerTrust>,
    pub config: ClientConfig,
    pub privacy: PrivacySettings,

    // UI 集合
    pub conversations: ConversationBook,
    pub messages: HashMap<ConvRef, MessageLog>,
    pub friends: Vec<FriendUi>,
    pub friend_requests: Vec<FriendRequestUi>,
    pub blocked: BTreeSet<String>,
    pub groups: Vec<GroupUi>,
    pub group_members: HashMap<String, Vec<GroupMemberUi>>,
    pub group_invites: Vec<GroupInviteUi>,
    pub devices: Vec<DeviceUi>,
    pub pairing_requests: Vec<PairingRequestUi>,
    pub calls: CallBook,
    pub outbox: Outbox,
    pub media_relay: BoundedLog<MediaRelayLog>,
    pub offline_payloads: BoundedLog<OfflinePayloadLog>,

    // 运行时
    pub native: Option<NativeHandle>,
    pub prefs: Option<PrefsDao>,
    pub poll_task: Option<PollTask>,
    /// 会话纪元；停止轮询时递增，过期周期的结果被丢弃
    pub epoch: u64,
    pub ticks: u64,
    pub recall_window: Duration,
    pub undo_grace: Duration,
    changes: Changes,
}

impl BridgeState {
    pub fn new(recall_window: Duration, undo_grace: Duration) -> Self {
        Self {
            initialized: false,
            logged_in: false,
            username: String::new(),
            token: String::new(),
            device_id: String::new(),
            last_error: String::new(),
            status_message: String::new(),
            remote_mode: false,
            remote_ok: false,
            remote_error: String::new(),
            is_mock: false,
            sdk_version: SdkVersion::default(),
            capabilities: 0,
            pending_server_trust: None,
            pending_peer_trust: None,
            config: ClientConfig::default(),
            privacy: PrivacySettings::default(),
            conversations: ConversationBook::default(),
            messages: HashMap::new(),
            friends: Vec::new(),
            friend_requests: Vec::new(),
            blocked: BTreeSet::new(),
            groups: Vec::new(),
            group_members: HashMap::new(),
            group_invites: Vec::new(),
            devices: Vec::new(),
            pairing_requests: Vec::new(),
            calls: CallBook::default(),
            outbox: Outbox::default(),
            media_relay: BoundedLog::default(),
            offline_payloads: BoundedLog::default(),
            native: None,
            prefs: None,
            poll_task: None,
            epoch: 0,
            ticks: 0,
            recall_window,
            undo_grace,
            changes: Changes::default(),
        }
    }

    // ---------- 就绪检查与错误记账 ----------

    pub fn require_native(&self) -> BridgeResult<NativeHandle> {
        self.native
            .clone()
            .ok_or_else(|| BridgeError::not_ready(NOT_INITIALIZED))
    }

    pub fn require_login(&self) -> BridgeResult<NativeHandle> {
        let native = self.require_native()?;
        if !self.logged_in {
            return Err(BridgeError::not_ready(NOT_LOGGED_IN));
        }
        Ok(native)
    }

    /// 按错误分类更新 `last_error`：成功清空，原生错误与未就绪写入，输入错误不写
    pub fn note<T>(&mut self, result: &BridgeResult<T>) {
        match result {
            Ok(_) => {
                if !self.last_error.is_empty() {
                    self.last_error.clear();
                    self.changes.session = true;
                }
            }
            Err(e) if e.is_shared() => {
                debug!("[Bridge] last_error <- {}", e);
                self.last_error = e.to_string();
                self.changes.session = true;
            }
            Err(_) => {}
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            initialized: self.initialized,
            logged_in: self.logged_in,
            username: self.username.clone(),
            token: self.token.clone(),
            device_id: self.device_id.clone(),
            last_error: self.last_error.clone(),
            status_message: self.status_message.clone(),
            remote_ok: self.remote_ok,
            remote_error: self.remote_error.clone(),
            is_mock: self.is_mock,
        }
    }

    /// 在线：有 token，且本地模式或远端可达
    pub fn is_online(&self) -> bool {
        self.logged_in && !self.token.is_empty() && (!self.remote_mode || self.remote_ok)
    }

    /// 连接状态描述（横幅展示）
    pub fn connection_detail(&self) -> String {
        if !self.logged_in {
            return "Not logged in".to_string();
        }
        if self.pending_server_trust.is_some() {
            return "Server fingerprint needs confirmation".to_string();
        }
        if self.token.is_empty() {
            return "Reconnecting…".to_string();
        }
        if !self.remote_mode {
            return "Online (local mode)".to_string();
        }
        if self.remote_ok {
            return "Online".to_string();
        }
        if self.remote_error.is_empty() {
            "Offline".to_string()
        } else {
            format!("Offline: {}", self.remote_error)
        }
    }

    /// 应用原生会话快照
    pub fn apply_session(&mut self, s: NativeSession) {
        if self.token != s.token
            || self.device_id != s.device_id
            || self.remote_mode != s.remote_mode
            || self.remote_ok != s.remote_ok
            || self.remote_error != s.remote_error
        {
            self.token = s.token;
            self.device_id = s.device_id;
            self.remote_mode = s.remote_mode;
            self.remote_ok = s.remote_ok;
            self.remote_error = s.remote_error;
            self.changes.session = true;
        }
        if self.pending_server_trust != s.pending_server_trust
            || self.pending_peer_trust != s.pending_peer_trust
        {
            self.pending_server_trust = s.pending_server_trust;
            self.pending_peer_trust = s.pending_peer_trust;
            self.changes.trust = true;
        }
        let incoming = s.incoming_call.map(Into::into);
        if self.calls.pending_call != incoming {
            self.calls.pending_call = incoming;
            self.changes.incoming_call = true;
        }
    }

    /// 清空会话相关的状态（登出、登录失败、释放）
    pub fn clear_session(&mut self) {
        self.logged_in = false;
        self.token.clear();
        self.username.clear();
        self.device_id.clear();
        self.remote_ok = false;
        self.remote_error.clear();
        self.pending_server_trust = None;
        self.pending_peer_trust = None;
        self.calls.clear();
        self.outbox.clear();
        self.changes.session = true;
        self.changes.call_rooms = true;
        self.changes.incoming_call = true;
        self.changes.trust = true;
    }

    /// 登出后清空账号相关的 UI 集合
    pub fn reset_collections(&mut self) {
        self.conversations = ConversationBook::default();
        self.messages.clear();
        self.friends.clear();
        self.friend_requests.clear();
        self.blocked.clear();
        self.groups.clear();
        self.group_members.clear();
        self.group_invites.clear();
        self.devices.clear();
        self.pairing_requests.clear();
        self.media_relay.clear();
        self.offline_payloads.clear();
        self.changes.conversations = true;
        self.changes.friends = true;
        self.changes.friend_requests = true;
    }

    /// 停止轮询：递增纪元、发出关闭信号并中止任务；重复调用无副作用
    pub fn stop_polling(&mut self) {
        let Some(task) = self.poll_task.take() else {
            return;
        };
        self.epoch += 1;
        task.stop();
        info!("[Bridge] 🛑 轮询已停止 (epoch={})", self.epoch);
    }

    // ---------- 变更记账 ----------

    pub fn mark_session(&mut self) {
        self.changes.session = true;
    }

    pub fn mark_conversations(&mut self) {
        self.changes.conversations = true;
    }

    pub fn mark_messages(&mut self, conv: &ConvRef) {
        self.changes.messages.insert(conv.clone());
        self.changes.conversations = true;
    }

    pub fn mark_friends(&mut self) {
        self.changes.friends = true;
    }

    pub fn mark_friend_requests(&mut self) {
        self.changes.friend_requests = true;
    }

    pub fn mark_call_rooms(&mut self) {
        self.changes.call_rooms = true;
    }

    pub fn mark_incoming_call(&mut self) {
        self.changes.incoming_call = true;
    }

    pub fn mark_trust(&mut self) {
        self.changes.trust = true;
    }

    /// 取出本次累积的通知（附带最新快照）
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        let changes = std::mem::take(&mut self.changes);
        let mut out = Vec::new();
        if changes.session {
            out.push(Notification::Session(self.snapshot()));
        }
        if changes.trust {
            out.push(Notification::Trust(
                self.pending_server_trust.clone(),
                self.pending_peer_trust.clone(),
            ));
        }
        if changes.conversations {
            out.push(Notification::Conversations(self.conversations.sorted()));
        }
        for conv in changes.messages {
            let items = self
                .messages
                .get(&conv)
                .map(|log| log.items().to_vec())
                .unwrap_or_default();
            out.push(Notification::Messages(conv, items));
        }
        if changes.friends {
            out.push(Notification::Friends(self.friends.clone()));
        }
        if changes.friend_requests {
            out.push(Notification::FriendRequests(self.friend_requests.clone()));
        }
        if changes.call_rooms {
            out.push(Notification::CallRooms(self.calls.rooms()));
        }
        if changes.incoming_call {
            out.push(Notification::IncomingCall(self.calls.pending_call.clone()));
        }
        out
    }

    // ---------- 会话与消息列表 ----------

    /// 会话显示名：好友备注 / 群名，未知时用 ID
    pub fn display_name(&self, conv: &ConvRef) -> String {
        if conv.is_group {
            self.groups
                .iter()
                .find(|g| g.id == conv.id && !g.name.trim().is_empty())
                .map(|g| g.name.clone())
                .unwrap_or_else(|| conv.id.clone())
        } else {
            self.friends
                .iter()
                .find(|f| f.username == conv.id)
                .map(|f| f.display_name().to_string())
                .unwrap_or_else(|| conv.id.clone())
        }
    }

    /// 确保会话存在；新建时从偏好库恢复置顶、免打扰与计数
    pub async fn ensure_conversation(&mut self, conv: &ConvRef) {
        let name = self.display_name(conv);
        if !self.conversations.ensure(conv, &name) {
            return;
        }
        if let Some(dao) = &self.prefs {
            match dao.load_conversation(conv).await {
                Ok(prefs) => self.conversations.apply_prefs(conv, prefs),
                Err(e) => warn!("[Bridge] ⚠️ 读取会话偏好失败 {}: {:#}", conv, e),
            }
        }
        self.changes.conversations = true;
    }

    /// 取会话的消息列表，首次访问时从偏好库恢复已删除、已召回、置顶与收藏
    pub async fn ensure_log(&mut self, conv: &ConvRef) -> &mut MessageLog {
        if !self.messages.contains_key(conv) {
            let prefs = match &self.prefs {
                Some(dao) => match dao.load_messages(conv).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[Bridge] ⚠️ 读取消息偏好失败 {}: {:#}", conv, e);
                        MessagePrefs::default()
                    }
                },
                None => MessagePrefs::default(),
            };
            let log = MessageLog::with_persisted(
                prefs.deleted,
                prefs.recalled,
                prefs.pinned,
                prefs.favorites,
            );
            self.messages.insert(conv.clone(), log);
        }
        self.messages.entry(conv.clone()).or_default()
    }

    /// 整体替换好友列表（保留已知的在线状态），并为每个好友建立会话
    pub async fn replace_friends(&mut self, entries: Vec<FriendEntry>) {
        let previous: HashMap<String, String> = self
            .friends
            .drain(..)
            .map(|f| (f.username, f.status))
            .collect();
        self.friends = entries
            .into_iter()
            .map(|e| {
                let mut f = FriendUi::from(e);
                if let Some(status) = previous.get(&f.username) {
                    f.status = status.clone();
                }
                f
            })
            .collect();
        let convs: Vec<ConvRef> = self
            .friends
            .iter()
            .map(|f| ConvRef::peer(&f.username))
            .collect();
        for conv in &convs {
            self.ensure_conversation(conv).await;
        }
        self.changes.friends = true;
        self.changes.conversations = true;
    }

    pub fn replace_friend_requests(&mut self, entries: Vec<FriendRequestEntry>) {
        let list: Vec<FriendRequestUi> = entries.into_iter().map(Into::into).collect();
        if list != self.friend_requests {
            self.friend_requests = list;
            self.changes.friend_requests = true;
        }
    }

    /// 整体替换群列表，并为每个群建立会话
    pub async fn replace_groups(&mut self, entries: Vec<GroupEntry>) {
        self.groups = entries.into_iter().map(Into::into).collect();
        let convs: Vec<ConvRef> = self.groups.iter().map(|g| ConvRef::group(&g.id)).collect();
        for conv in &convs {
            self.ensure_conversation(conv).await;
        }
        self.changes.conversations = true;
    }

    /// 用当前最后一条可见消息刷新会话摘要
    pub fn refresh_preview(&mut self, conv: &ConvRef) {
        let preview = self
            .messages
            .get(conv)
            .and_then(|log| log.last())
            .map(|m| m.preview_text())
            .unwrap_or_default();
        self.conversations.set_preview(conv, preview);
        self.changes.conversations = true;
    }

    /// 己方消息的召回截止时刻；按消息时间戳折算，已过期时为 None
    pub fn recall_deadline_for(&self, ts_ms: i64) -> Option<Instant> {
        let age_ms = now_ms().saturating_sub(ts_ms).max(0) as u64;
        let window_ms = self.recall_window.as_millis() as u64;
        if age_ms >= window_ms {
            return None;
        }
        Some(Instant::now() + Duration::from_millis(window_ms - age_ms))
    }

    /// 提交所有到期的删除，返回有变化的会话
    pub async fn commit_expired_deletes(&mut self, now: Instant) -> Vec<ConvRef> {
        let mut committed = Vec::new();
        for (conv, log) in self.messages.iter_mut() {
            if !log.has_pending_deletes() {
                continue;
            }
            let ids = log.commit_expired(now);
            if !ids.is_empty() {
                debug!("[Bridge] 🗑️ 删除已生效 {}: {:?}", conv, ids);
                committed.push(conv.clone());
            }
        }
        for conv in &committed {
            self.persist_message_prefs(conv).await;
        }
        committed
    }

    /// 立即提交所有待删除并落盘，会话状态清空前调用
    pub async fn commit_all_deletes(&mut self) {
        let mut committed = Vec::new();
        for (conv, log) in self.messages.iter_mut() {
            if !log.has_pending_deletes() {
                continue;
            }
            let ids = log.commit_all();
            debug!("[Bridge] 🗑️ 提前提交删除 {}: {:?}", conv, ids);
            committed.push(conv.clone());
        }
        for conv in &committed {
            self.persist_message_prefs(conv).await;
        }
    }

    // ---------- 持久化（失败只记录日志） ----------

    pub async fn persist_counters(&self, conv: &ConvRef) {
        let (Some(dao), Some(p)) = (&self.prefs, self.conversations.prefs(conv)) else {
            return;
        };
        if let Err(e) = dao.save_counters(conv, p.unread, p.mention).await {
            warn!("[Bridge] ⚠️ 保存计数失败 {}: {:#}", conv, e);
        }
    }

    pub async fn persist_bool(&self, key: &str, value: bool) {
        let Some(dao) = &self.prefs else {
            return;
        };
        if let Err(e) = dao.set_bool(key, value).await {
            warn!("[Bridge] ⚠️ 保存偏好失败 {}: {:#}", key, e);
        }
    }

    pub async fn persist_string(&self, key: &str, value: &str) {
        let Some(dao) = &self.prefs else {
            return;
        };
        if let Err(e) = dao.set_string(key, value).await {
            warn!("[Bridge] ⚠️ 保存偏好失败 {}: {:#}", key, e);
        }
    }

    /// 保存会话的消息级集合与置顶消息
    pub async fn persist_message_prefs(&self, conv: &ConvRef) {
        let (Some(dao), Some(log)) = (&self.prefs, self.messages.get(conv)) else {
            return;
        };
        let result = async {
            dao.set_set(&keys::msg_deleted(conv), log.deleted_ids()).await?;
            dao.set_set(&keys::msg_recalled(conv), log.recalled_ids()).await?;
            dao.set_set(&keys::msg_favorite(conv), log.favorite_ids()).await?;
            dao.save_pinned_message(conv, log.pinned_id()).await
        }
        .await;
        if let Err(e) = result {
            warn!("[Bridge] ⚠️ 保存消息偏好失败 {}: {:#}", conv, e);
        }
    }

    pub async fn clear_message_prefs(&self, conv: &ConvRef) {
        let Some(dao) = &self.prefs else {
            return;
        };
        if let Err(e) = dao.clear_messages(conv).await {
            warn!("[Bridge] ⚠️ 清除消息偏好失败 {}: {:#}", conv, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::native::IncomingCallEntry;

    fn state() -> BridgeState {
        BridgeState::new(Duration::from_secs(120), Duration::from_millis(3500))
    }

    #[test]
    fn input_errors_never_reach_last_error() {
        let mut st = state();
        st.note::<()>(&Err(BridgeError::invalid("bad hex")));
        assert!(st.last_error.is_empty());
        st.note::<()>(&Err(BridgeError::Native("timeout".into())));
        assert_eq!(st.last_error, "timeout");
        st.note(&Ok(()));
        assert!(st.last_error.is_empty());
    }

    #[test]
    fn readiness_checks_come_first() {
        let st = state();
        assert_eq!(
            st.require_login().err(),
            Some(BridgeError::not_ready(NOT_INITIALIZED))
        );
    }

    #[test]
    fn connection_detail_precedence() {
        let mut st = state();
        assert_eq!(st.connection_detail(), "Not logged in");
        st.logged_in = true;
        assert_eq!(st.connection_detail(), "Reconnecting…");
        st.token = "t".into();
        assert_eq!(st.connection_detail(), "Online (local mode)");
        st.remote_mode = true;
        st.remote_error = "tls handshake".into();
        assert_eq!(st.connection_detail(), "Offline: tls handshake");
        st.pending_server_trust = Some(PendingServerTrust {
            fingerprint: "ab".into(),
            pin: "1234".into(),
        });
        assert_eq!(st.connection_detail(), "Server fingerprint needs confirmation");
    }

    #[test]
    fn session_snapshot_emits_only_on_change() {
        let mut st = state();
        let session = NativeSession {
            token: "t1".into(),
            incoming_call: Some(IncomingCallEntry {
                peer: "bob".into(),
                call_id: [1; 16],
                video: true,
            }),
            ..Default::default()
        };
        st.apply_session(session.clone());
        let first = st.take_notifications();
        assert!(first.iter().any(|n| matches!(n, Notification::Session(_))));
        assert!(first
            .iter()
            .any(|n| matches!(n, Notification::IncomingCall(Some(c)) if c.peer == "bob")));
        st.apply_session(session);
        assert!(st.take_notifications().is_empty());
    }

    #[test]
    fn recall_deadline_is_relative_to_message_age() {
        let st = state();
        assert!(st.recall_deadline_for(now_ms()).is_some());
        assert!(st.recall_deadline_for(now_ms() - 121_000).is_none());
    }
}
