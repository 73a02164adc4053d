//! 确定性的模拟 SDK
//!
//! 原生库不可用时作为兜底，让 UI 仍能演示；测试通过 `MockControl` 注入事件与失败。

use super::models::*;
use super::{NativeError, NativeResult, NativeSdk};
use crate::bridge::event::event_type;
use crate::bridge::serialization::CALL_ID_LEN;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// 模拟 SDK 的全部可观察状态
#[derive(Debug, Default)]
struct MockScript {
    username: String,
    token: String,
    device_id: String,
    next_id: u64,
    auto_delivery: bool,
    events: VecDeque<RawEvent>,
    failures: HashMap<String, NativeError>,
    calls: Vec<String>,
    sent: Vec<(String, bool, OutgoingPayload)>,
    friends: Vec<FriendEntry>,
    friend_requests: Vec<FriendRequestEntry>,
    groups: Vec<GroupEntry>,
    group_members: HashMap<String, Vec<GroupMemberEntry>>,
    devices: Vec<DeviceEntry>,
    pairing_requests: Vec<PairingRequestEntry>,
    history: HashMap<(String, bool), Vec<HistoryEntry>>,
    pending_server_trust: Option<PendingServerTrust>,
    pending_peer_trust: Option<PendingPeerTrust>,
    incoming_call: Option<IncomingCallEntry>,
    remote_ok: bool,
    remote_error: String,
}

/// 测试侧控制句柄，与 `MockSdk` 共享状态
#[derive(Clone, Default)]
pub struct MockControl {
    script: Arc<Mutex<MockScript>>,
}

impl MockControl {
    fn lock(&self) -> MutexGuard<'_, MockScript> {
        match self.script.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 追加一条待轮询的事件
    pub fn push_event(&self, event: RawEvent) {
        self.lock().events.push_back(event);
    }

    /// 让下一次名为 `op` 的调用失败
    pub fn fail_next(&self, op: &str, message: &str) {
        self.lock()
            .failures
            .insert(op.to_string(), NativeError::new(message));
    }

    /// 让下一次 `op` 失败，但携带已分配的消息 ID（可重试的发送失败）
    pub fn fail_next_with_id(&self, op: &str, message: &str, message_id: &str) {
        self.lock().failures.insert(
            op.to_string(),
            NativeError::with_message_id(message, message_id),
        );
    }

    /// 已发生的调用记录
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// 已成功发送的载荷
    pub fn sent(&self) -> Vec<(String, bool, OutgoingPayload)> {
        self.lock().sent.clone()
    }

    pub fn set_auto_delivery(&self, enabled: bool) {
        self.lock().auto_delivery = enabled;
    }

    pub fn set_history(&self, conv_id: &str, is_group: bool, entries: Vec<HistoryEntry>) {
        self.lock()
            .history
            .insert((conv_id.to_string(), is_group), entries);
    }

    pub fn set_friends(&self, friends: Vec<FriendEntry>) {
        self.lock().friends = friends;
    }

    pub fn set_pending_server_trust(&self, trust: Option<PendingServerTrust>) {
        self.lock().pending_server_trust = trust;
    }

    pub fn set_incoming_call(&self, call: Option<IncomingCallEntry>) {
        self.lock().incoming_call = call;
    }

    /// 模拟会话过期
    pub fn drop_token(&self) {
        self.lock().token.clear();
    }

    pub fn set_remote_status(&self, ok: bool, error: &str) {
        let mut s = self.lock();
        s.remote_ok = ok;
        s.remote_error = error.to_string();
    }

    pub fn add_pairing_request(&self, device_id: &str, request_id_hex: &str) {
        self.lock().pairing_requests.push(PairingRequestEntry {
            device_id: device_id.to_string(),
            request_id_hex: request_id_hex.to_string(),
        });
    }
}

/// 模拟 SDK
pub struct MockSdk {
    control: MockControl,
}

fn history_text(id: &str, peer: &str, outgoing: bool, ts: i64, text: &str) -> HistoryEntry {
    HistoryEntry {
        kind: HistoryKind::Text,
        status: if outgoing {
            HistoryStatus::Read
        } else {
            HistoryStatus::Delivered
        },
        is_group: false,
        outgoing,
        timestamp_sec: ts,
        conv_id: peer.to_string(),
        sender: peer.to_string(),
        message_id: id.to_string(),
        text: text.to_string(),
        file_id: String::new(),
        file_key: Vec::new(),
        file_name: String::new(),
        file_size: 0,
        sticker_id: String::new(),
    }
}

impl MockSdk {
    /// 创建带演示数据的模拟 SDK 与其控制句柄
    pub fn new() -> (Self, MockControl) {
        let control = MockControl::default();
        {
            let mut s = control.lock();
            s.auto_delivery = true;
            s.remote_ok = true;
            s.friends = vec![
                FriendEntry {
                    username: "alice".to_string(),
                    remark: "Alice".to_string(),
                },
                FriendEntry {
                    username: "bob".to_string(),
                    remark: "Bob".to_string(),
                },
            ];
            s.friend_requests = vec![FriendRequestEntry {
                requester_username: "carol".to_string(),
                requester_remark: "Carol".to_string(),
            }];
            s.groups = vec![GroupEntry {
                group_id: "g-demo".to_string(),
                name: "Demo Group".to_string(),
            }];
            s.group_members.insert(
                "g-demo".to_string(),
                vec![
                    GroupMemberEntry {
                        username: "alice".to_string(),
                        role: 0,
                    },
                    GroupMemberEntry {
                        username: "bob".to_string(),
                        role: 2,
                    },
                ],
            );
            s.devices = vec![
                DeviceEntry {
                    device_id: "mock-device-1".to_string(),
                    last_seen_sec: 0,
                },
                DeviceEntry {
                    device_id: "mock-tablet".to_string(),
                    last_seen_sec: 3600,
                },
            ];
            s.history.insert(
                ("alice".to_string(), false),
                vec![
                    history_text("mock-h1", "alice", false, 1_700_000_000, "Hi there"),
                    history_text("mock-h2", "alice", true, 1_700_000_060, "Hello Alice"),
                ],
            );
        }
        (
            Self {
                control: control.clone(),
            },
            control,
        )
    }

    fn lock(&self) -> MutexGuard<'_, MockScript> {
        self.control.lock()
    }

    /// 记录调用并检查是否注入了失败
    fn enter(&self, op: &str, detail: String) -> NativeResult<MutexGuard<'_, MockScript>> {
        let mut s = self.lock();
        s.calls.push(detail);
        match s.failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(s),
        }
    }

    fn require_login(s: &MockScript) -> NativeResult<()> {
        if s.token.is_empty() {
            return Err(NativeError::new("not logged in"));
        }
        Ok(())
    }

    fn next_id(s: &mut MockScript) -> u64 {
        s.next_id += 1;
        s.next_id
    }

    fn call_id(n: u64) -> [u8; CALL_ID_LEN] {
        let mut id = [0u8; CALL_ID_LEN];
        id[CALL_ID_LEN - 8..].copy_from_slice(&n.to_be_bytes());
        id
    }
}

impl NativeSdk for MockSdk {
    fn version(&self) -> SdkVersion {
        SdkVersion {
            major: 0,
            minor: 0,
            patch: 0,
            abi: 0,
        }
    }

    fn capabilities(&self) -> u32 {
        capability::CHAT | capability::GROUP | capability::GROUP_CALL
    }

    fn session(&self) -> NativeSession {
        let s = self.lock();
        NativeSession {
            token: s.token.clone(),
            device_id: s.device_id.clone(),
            remote_mode: false,
            remote_ok: s.remote_ok,
            remote_error: s.remote_error.clone(),
            pending_server_trust: s.pending_server_trust.clone(),
            pending_peer_trust: s.pending_peer_trust.clone(),
            incoming_call: s.incoming_call.clone(),
        }
    }

    fn register(&mut self, username: &str, password: &str) -> NativeResult<()> {
        let _s = self.enter("register", format!("register:{}", username))?;
        if username.is_empty() || password.is_empty() {
            return Err(NativeError::new("username or password empty"));
        }
        Ok(())
    }

    fn login(&mut self, username: &str, password: &str) -> NativeResult<()> {
        let mut s = self.enter("login", format!("login:{}", username))?;
        if username.is_empty() || password.is_empty() {
            return Err(NativeError::new("username or password empty"));
        }
        s.username = username.to_string();
        s.token = format!("mock-token-{}", username);
        s.device_id = "mock-device-1".to_string();
        Ok(())
    }

    fn logout(&mut self) -> NativeResult<()> {
        let mut s = self.enter("logout", "logout".to_string())?;
        s.token.clear();
        s.username.clear();
        Ok(())
    }

    fn relogin(&mut self) -> NativeResult<()> {
        let mut s = self.enter("relogin", "relogin".to_string())?;
        if s.username.is_empty() {
            return Err(NativeError::new("no cached credentials"));
        }
        s.token = format!("mock-token-{}", s.username);
        Ok(())
    }

    fn heartbeat(&mut self) -> NativeResult<()> {
        let s = self.enter("heartbeat", "heartbeat".to_string())?;
        Self::require_login(&s)
    }

    fn trust_pending_server(&mut self, pin: &str) -> NativeResult<()> {
        let mut s = self.enter("trust_server", format!("trust_server:{}", pin))?;
        match &s.pending_server_trust {
            Some(t) if t.pin == pin => {
                s.pending_server_trust = None;
                Ok(())
            }
            Some(_) => Err(NativeError::new("pin mismatch")),
            None => Err(NativeError::new("no pending server trust")),
        }
    }

    fn trust_pending_peer(&mut self, pin: &str) -> NativeResult<()> {
        let mut s = self.enter("trust_peer", format!("trust_peer:{}", pin))?;
        match &s.pending_peer_trust {
            Some(t) if t.pin == pin => {
                s.pending_peer_trust = None;
                Ok(())
            }
            Some(_) => Err(NativeError::new("pin mismatch")),
            None => Err(NativeError::new("no pending peer trust")),
        }
    }

    fn send(
        &mut self,
        target: &str,
        is_group: bool,
        payload: &OutgoingPayload,
    ) -> NativeResult<String> {
        let mut s = self.enter(
            "send",
            format!("send:{}:{}", target, payload.kind_name()),
        )?;
        Self::require_login(&s)?;
        let n = Self::next_id(&mut s);
        let id = format!("mock-{}", n);
        s.sent
            .push((target.to_string(), is_group, payload.clone()));
        if s.auto_delivery && !is_group {
            s.events.push_back(RawEvent {
                type_id: event_type::DELIVERY,
                peer: target.to_string(),
                message_id: id.clone(),
                ..Default::default()
            });
        }
        Ok(id)
    }

    fn resend(
        &mut self,
        target: &str,
        is_group: bool,
        message_id: &str,
        payload: &OutgoingPayload,
    ) -> NativeResult<()> {
        let mut s = self.enter("resend", format!("resend:{}:{}", target, message_id))?;
        Self::require_login(&s)?;
        s.sent
            .push((target.to_string(), is_group, payload.clone()));
        Ok(())
    }

    fn send_read_receipt(&mut self, peer: &str, message_id: &str) -> NativeResult<()> {
        let _s = self.enter(
            "read_receipt",
            format!("read_receipt:{}:{}", peer, message_id),
        )?;
        Ok(())
    }

    fn send_typing(&mut self, peer: &str, typing: bool) -> NativeResult<()> {
        let _s = self.enter("typing", format!("typing:{}:{}", peer, typing))?;
        Ok(())
    }

    fn send_presence(&mut self, peer: &str, online: bool) -> NativeResult<()> {
        let _s = self.enter("presence", format!("presence:{}:{}", peer, online))?;
        Ok(())
    }

    fn poll_events(&mut self, max_events: u32, _wait_ms: u32) -> Vec<RawEvent> {
        let mut s = self.lock();
        let take = (max_events as usize).min(s.events.len());
        s.events.drain(..take).collect()
    }

    fn add_friend(&mut self, username: &str, remark: &str) -> NativeResult<()> {
        let mut s = self.enter("add_friend", format!("add_friend:{}", username))?;
        if !s.friends.iter().any(|f| f.username == username) {
            s.friends.push(FriendEntry {
                username: username.to_string(),
                remark: remark.to_string(),
            });
        }
        Ok(())
    }

    fn set_friend_remark(&mut self, username: &str, remark: &str) -> NativeResult<()> {
        let mut s = self.enter("set_friend_remark", format!("set_friend_remark:{}", username))?;
        match s.friends.iter_mut().find(|f| f.username == username) {
            Some(f) => {
                f.remark = remark.to_string();
                Ok(())
            }
            None => Err(NativeError::new("not friends")),
        }
    }

    fn delete_friend(&mut self, username: &str) -> NativeResult<()> {
        let mut s = self.enter("delete_friend", format!("delete_friend:{}", username))?;
        s.friends.retain(|f| f.username != username);
        Ok(())
    }

    fn set_user_blocked(&mut self, username: &str, blocked: bool) -> NativeResult<()> {
        let _s = self.enter("block", format!("block:{}:{}", username, blocked))?;
        Ok(())
    }

    fn send_friend_request(&mut self, username: &str, _remark: &str) -> NativeResult<()> {
        let _s = self.enter("friend_request", format!("friend_request:{}", username))?;
        Ok(())
    }

    fn respond_friend_request(&mut self, username: &str, accept: bool) -> NativeResult<()> {
        let mut s = self.enter(
            "respond_friend_request",
            format!("respond_friend_request:{}:{}", username, accept),
        )?;
        let Some(pos) = s
            .friend_requests
            .iter()
            .position(|r| r.requester_username == username)
        else {
            return Err(NativeError::new("friend request not found"));
        };
        let req = s.friend_requests.remove(pos);
        if accept {
            s.friends.push(FriendEntry {
                username: req.requester_username,
                remark: req.requester_remark,
            });
        }
        Ok(())
    }

    fn list_friends(&mut self) -> NativeResult<Vec<FriendEntry>> {
        let s = self.enter("list_friends", "list_friends".to_string())?;
        Ok(s.friends.clone())
    }

    fn list_friend_requests(&mut self) -> NativeResult<Vec<FriendRequestEntry>> {
        let s = self.enter("list_friend_requests", "list_friend_requests".to_string())?;
        Ok(s.friend_requests.clone())
    }

    fn join_group(&mut self, group_id: &str) -> NativeResult<()> {
        let mut s = self.enter("join_group", format!("join_group:{}", group_id))?;
        if !s.groups.iter().any(|g| g.group_id == group_id) {
            s.groups.push(GroupEntry {
                group_id: group_id.to_string(),
                name: group_id.to_string(),
            });
        }
        Ok(())
    }

    fn leave_group(&mut self, group_id: &str) -> NativeResult<()> {
        let mut s = self.enter("leave_group", format!("leave_group:{}", group_id))?;
        s.groups.retain(|g| g.group_id != group_id);
        Ok(())
    }

    fn create_group(&mut self) -> NativeResult<String> {
        let mut s = self.enter("create_group", "create_group".to_string())?;
        let n = Self::next_id(&mut s);
        let id = format!("mock-group-{}", n);
        s.groups.push(GroupEntry {
            group_id: id.clone(),
            name: id.clone(),
        });
        let me = s.username.clone();
        s.group_members.insert(
            id.clone(),
            vec![GroupMemberEntry {
                username: me,
                role: 0,
            }],
        );
        Ok(id)
    }

    fn send_group_invite(&mut self, group_id: &str, peer: &str) -> NativeResult<String> {
        let mut s = self.enter("group_invite", format!("group_invite:{}:{}", group_id, peer))?;
        let n = Self::next_id(&mut s);
        Ok(format!("mock-{}", n))
    }

    fn list_group_members(&mut self, group_id: &str) -> NativeResult<Vec<GroupMemberEntry>> {
        let s = self.enter("list_group_members", format!("list_group_members:{}", group_id))?;
        Ok(s.group_members.get(group_id).cloned().unwrap_or_default())
    }

    fn set_group_member_role(
        &mut self,
        group_id: &str,
        peer: &str,
        role: u32,
    ) -> NativeResult<()> {
        let mut s = self.enter("set_member_role", format!("set_member_role:{}:{}", group_id, peer))?;
        let member = s
            .group_members
            .get_mut(group_id)
            .and_then(|m| m.iter_mut().find(|m| m.username == peer));
        match member {
            Some(m) => {
                m.role = role;
                Ok(())
            }
            None => Err(NativeError::new("not in group")),
        }
    }

    fn kick_group_member(&mut self, group_id: &str, peer: &str) -> NativeResult<()> {
        let mut s = self.enter("kick_member", format!("kick_member:{}:{}", group_id, peer))?;
        if let Some(members) = s.group_members.get_mut(group_id) {
            members.retain(|m| m.username != peer);
        }
        Ok(())
    }

    fn list_groups(&mut self) -> NativeResult<Vec<GroupEntry>> {
        let s = self.enter("list_groups", "list_groups".to_string())?;
        Ok(s.groups.clone())
    }

    fn list_devices(&mut self) -> NativeResult<Vec<DeviceEntry>> {
        let s = self.enter("list_devices", "list_devices".to_string())?;
        Ok(s.devices.clone())
    }

    fn kick_device(&mut self, device_id: &str) -> NativeResult<()> {
        let mut s = self.enter("kick_device", format!("kick_device:{}", device_id))?;
        s.devices.retain(|d| d.device_id != device_id);
        Ok(())
    }

    fn begin_device_pairing_primary(&mut self) -> NativeResult<String> {
        let _s = self.enter("pairing_primary", "pairing_primary".to_string())?;
        Ok("MOCK-PAIR-0001".to_string())
    }

    fn poll_device_pairing_requests(&mut self) -> NativeResult<Vec<PairingRequestEntry>> {
        let s = self.enter("pairing_requests", "pairing_requests".to_string())?;
        Ok(s.pairing_requests.clone())
    }

    fn approve_device_pairing_request(
        &mut self,
        device_id: &str,
        request_id_hex: &str,
    ) -> NativeResult<()> {
        let mut s = self.enter(
            "pairing_approve",
            format!("pairing_approve:{}:{}", device_id, request_id_hex),
        )?;
        s.pairing_requests
            .retain(|r| !(r.device_id == device_id && r.request_id_hex == request_id_hex));
        s.devices.push(DeviceEntry {
            device_id: device_id.to_string(),
            last_seen_sec: 0,
        });
        Ok(())
    }

    fn begin_device_pairing_linked(&mut self, pairing_code: &str) -> NativeResult<()> {
        let _s = self.enter("pairing_linked", format!("pairing_linked:{}", pairing_code))?;
        Ok(())
    }

    fn poll_device_pairing_linked(&mut self) -> NativeResult<bool> {
        let _s = self.enter("pairing_linked_poll", "pairing_linked_poll".to_string())?;
        Ok(true)
    }

    fn cancel_device_pairing(&mut self) {
        self.lock().calls.push("pairing_cancel".to_string());
    }

    fn load_chat_history(
        &mut self,
        conv_id: &str,
        is_group: bool,
        limit: u32,
    ) -> NativeResult<Vec<HistoryEntry>> {
        let s = self.enter("load_history", format!("load_history:{}", conv_id))?;
        let mut entries = s
            .history
            .get(&(conv_id.to_string(), is_group))
            .cloned()
            .unwrap_or_default();
        if entries.len() > limit as usize {
            entries.drain(..entries.len() - limit as usize);
        }
        Ok(entries)
    }

    fn delete_chat_history(
        &mut self,
        conv_id: &str,
        is_group: bool,
        _delete_attachments: bool,
        _secure_wipe: bool,
    ) -> NativeResult<()> {
        let mut s = self.enter("delete_history", format!("delete_history:{}", conv_id))?;
        s.history.remove(&(conv_id.to_string(), is_group));
        Ok(())
    }

    fn set_history_enabled(&mut self, enabled: bool) -> NativeResult<()> {
        let _s = self.enter("history_enabled", format!("history_enabled:{}", enabled))?;
        Ok(())
    }

    fn clear_all_history(
        &mut self,
        _delete_attachments: bool,
        _secure_wipe: bool,
    ) -> NativeResult<()> {
        let mut s = self.enter("clear_history", "clear_history".to_string())?;
        s.history.clear();
        Ok(())
    }

    fn store_attachment_preview_bytes(
        &mut self,
        file_id: &str,
        _file_name: &str,
        _file_size: u64,
        _bytes: &[u8],
    ) -> NativeResult<()> {
        let _s = self.enter("store_preview", format!("store_preview:{}", file_id))?;
        Ok(())
    }

    fn download_chat_file_to_path(
        &mut self,
        file_id: &str,
        _file_key: &[u8],
        file_name: &str,
        _file_size: u64,
        out_path: &Path,
    ) -> NativeResult<()> {
        let _s = self.enter("download", format!("download:{}", file_id))?;
        std::fs::write(out_path, format!("mock file {}", file_name))
            .map_err(|e| NativeError::new(format!("write failed: {}", e)))
    }

    fn get_media_config(&mut self) -> NativeResult<MediaConfig> {
        let _s = self.enter("media_config", "media_config".to_string())?;
        Ok(MediaConfig {
            audio_delay_ms: 60,
            video_delay_ms: 120,
            audio_max_frames: 256,
            video_max_frames: 256,
            pull_max_packets: 32,
            pull_wait_ms: 0,
            group_pull_max_packets: 64,
            group_pull_wait_ms: 0,
        })
    }

    fn start_peer_call(&mut self, peer: &str, video: bool) -> NativeResult<CallDescriptor> {
        let mut s = self.enter("start_peer_call", format!("start_peer_call:{}", peer))?;
        let n = Self::next_id(&mut s);
        Ok(CallDescriptor {
            call_id: Self::call_id(n),
            key_id: 1,
            media_flags: media_flags(video),
        })
    }

    fn accept_peer_call(
        &mut self,
        peer: &str,
        call_id: &[u8; CALL_ID_LEN],
    ) -> NativeResult<CallDescriptor> {
        let mut s = self.enter("accept_peer_call", format!("accept_peer_call:{}", peer))?;
        let video = s.incoming_call.as_ref().map(|c| c.video).unwrap_or(false);
        s.incoming_call = None;
        Ok(CallDescriptor {
            call_id: *call_id,
            key_id: 1,
            media_flags: media_flags(video),
        })
    }

    fn decline_peer_call(&mut self, peer: &str, _call_id: &[u8; CALL_ID_LEN]) -> NativeResult<()> {
        let mut s = self.enter("decline_peer_call", format!("decline_peer_call:{}", peer))?;
        s.incoming_call = None;
        Ok(())
    }

    fn end_peer_call(&mut self, peer: &str, _call_id: &[u8; CALL_ID_LEN]) -> NativeResult<()> {
        let _s = self.enter("end_peer_call", format!("end_peer_call:{}", peer))?;
        Ok(())
    }

    fn start_group_call(&mut self, group_id: &str, video: bool) -> NativeResult<CallDescriptor> {
        let mut s = self.enter("start_group_call", format!("start_group_call:{}", group_id))?;
        let n = Self::next_id(&mut s);
        Ok(CallDescriptor {
            call_id: Self::call_id(n),
            key_id: 1,
            media_flags: media_flags(video),
        })
    }

    fn join_group_call(
        &mut self,
        group_id: &str,
        call_id: &[u8; CALL_ID_LEN],
        video: bool,
    ) -> NativeResult<CallDescriptor> {
        let _s = self.enter("join_group_call", format!("join_group_call:{}", group_id))?;
        Ok(CallDescriptor {
            call_id: *call_id,
            key_id: 1,
            media_flags: media_flags(video),
        })
    }

    fn leave_group_call(
        &mut self,
        group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
    ) -> NativeResult<()> {
        let _s = self.enter("leave_group_call", format!("leave_group_call:{}", group_id))?;
        Ok(())
    }

    fn get_group_call_key(
        &mut self,
        group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
        key_id: u32,
    ) -> NativeResult<Vec<u8>> {
        let _s = self.enter("group_call_key", format!("group_call_key:{}:{}", group_id, key_id))?;
        Ok(vec![key_id as u8; 32])
    }

    fn rotate_group_call_key(
        &mut self,
        group_id: &str,
        _call_id: &[u8; CALL_ID_LEN],
        key_id: u32,
        _members: &[String],
    ) -> NativeResult<()> {
        let _s = self.enter(
            "rotate_group_call_key",
            format!("rotate_group_call_key:{}:{}", group_id, key_id),
        )?;
        Ok(())
    }
}

fn media_flags(video: bool) -> u8 {
    if video {
        media_flag::AUDIO | media_flag::VIDEO
    } else {
        media_flag::AUDIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_failure_fires_once() {
        let (mut sdk, control) = MockSdk::new();
        control.fail_next("login", "bad password");
        assert_eq!(sdk.login("alice", "pw").unwrap_err().message, "bad password");
        assert!(sdk.login("alice", "pw").is_ok());
        assert_eq!(control.calls(), vec!["login:alice", "login:alice"]);
    }

    #[test]
    fn send_queues_delivery_receipt() {
        let (mut sdk, _control) = MockSdk::new();
        sdk.login("me", "pw").unwrap();
        let id = sdk
            .send(
                "alice",
                false,
                &OutgoingPayload::Text {
                    text: "hi".into(),
                    reply: None,
                },
            )
            .unwrap();
        let events = sdk.poll_events(16, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].type_id, event_type::DELIVERY);
        assert_eq!(events[0].message_id, id);
    }

    #[test]
    fn send_requires_login() {
        let (mut sdk, _control) = MockSdk::new();
        let err = sdk
            .send("alice", false, &OutgoingPayload::Sticker { sticker_id: "s1".into() })
            .unwrap_err();
        assert_eq!(err.message, "not logged in");
    }

    #[test]
    fn history_is_truncated_to_limit() {
        let (mut sdk, _control) = MockSdk::new();
        let entries = sdk.load_chat_history("alice", false, 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_id, "mock-h2");
    }
}
