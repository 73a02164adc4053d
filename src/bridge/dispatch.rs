//! SDK 事件分发
//!
//! 每个 `SdkEvent` 变体对应一个处理分支，处理是幂等的：重复的回执、
//! 重复的消息回显都不会产生第二次变更。需要再调用原生层的动作
//! （如已读回执）作为 `FollowUp` 返回，由调用方在释放状态锁后执行。

use crate::bridge::event::{parse_recall, FileRef, GroupNoticeKind, SdkEvent};
use crate::bridge::friend::presence_label;
use crate::bridge::group::{GroupInviteUi, GroupMemberRole};
use crate::bridge::message::{
    Attachment, AttachmentKind, ChatMessage, MessageStatus, Recaller, TransferState,
};
use crate::bridge::native::OutgoingPayload;
use crate::bridge::relay::{MediaRelayLog, OfflinePayloadLog};
use crate::bridge::serialization::{derived_msg_id, human_size, now_ms};
use crate::bridge::state::BridgeState;
use crate::bridge::types::ConvRef;
use tokio::time::Instant;
use tracing::{debug, info};

/// 事件处理后需要执行的原生调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    ReadReceipt { peer: String, message_id: String },
    RefreshGroupMembers(String),
}

fn event_ts(ts_ms: u64) -> i64 {
    if ts_ms == 0 {
        now_ms()
    } else {
        ts_ms as i64
    }
}

fn file_attachment(file: FileRef) -> Attachment {
    Attachment {
        kind: AttachmentKind::File,
        meta: human_size(file.file_size),
        label: file.file_name,
        state: TransferState::Ready,
        progress: 0.0,
        file_id: Some(file.file_id).filter(|id| !id.is_empty()),
        file_key_hex: Some(hex::encode(&file.file_key)).filter(|k| !k.is_empty()),
        file_size: Some(file.file_size),
    }
}

fn with_attachment(mut msg: ChatMessage, attachment: Attachment) -> ChatMessage {
    msg.attachment = Some(attachment);
    msg
}

fn sticker(id: String) -> Attachment {
    Attachment::simple(AttachmentKind::Sticker, id, "")
}

fn notice_text(kind: GroupNoticeKind, actor: &str, target: &str, role: u32) -> String {
    match kind {
        GroupNoticeKind::Join => {
            let who = if target.is_empty() { actor } else { target };
            format!("{} joined the group", who)
        }
        GroupNoticeKind::Leave => format!("{} left the group", actor),
        GroupNoticeKind::Kick => format!("{} was removed by {}", target, actor),
        GroupNoticeKind::RoleSet => {
            let label = match GroupMemberRole::from_code(role) {
                Some(GroupMemberRole::Owner) => "owner",
                Some(GroupMemberRole::Admin) => "admin",
                _ => "member",
            };
            format!("{} is now {}", target, label)
        }
        GroupNoticeKind::Other(_) => "Group updated".to_string(),
    }
}

impl BridgeState {
    /// 消息中是否 @ 了自己
    pub fn mentions_me(&self, text: &str) -> bool {
        !self.username.is_empty() && text.contains(&format!("@{}", self.username))
    }

    /// 应用一条 SDK 事件
    pub async fn apply_event(&mut self, event: SdkEvent) -> Vec<FollowUp> {
        let mut follow = Vec::new();
        match event {
            SdkEvent::ChatText {
                peer,
                message_id,
                text,
                ts_ms,
            } => {
                let conv = ConvRef::peer(&peer);
                if let Some(target) = parse_recall(&text) {
                    self.apply_recall_marker(&conv, target, Recaller::Peer(peer), false).await;
                } else {
                    let msg = ChatMessage::new(
                        message_id,
                        peer,
                        text,
                        event_ts(ts_ms),
                        false,
                        MessageStatus::Delivered,
                    );
                    self.receive(&conv, msg, false, &mut follow).await;
                }
            }
            SdkEvent::ChatFile {
                peer,
                message_id,
                file,
                ts_ms,
            } => {
                let conv = ConvRef::peer(&peer);
                let msg = ChatMessage::new(message_id, peer, "", event_ts(ts_ms), false, MessageStatus::Delivered);
                self.receive(&conv, with_attachment(msg, file_attachment(file)), false, &mut follow)
                    .await;
            }
            SdkEvent::ChatSticker {
                peer,
                message_id,
                sticker_id,
                ts_ms,
            } => {
                let conv = ConvRef::peer(&peer);
                let msg = ChatMessage::new(message_id, peer, "", event_ts(ts_ms), false, MessageStatus::Delivered);
                self.receive(&conv, with_attachment(msg, sticker(sticker_id)), false, &mut follow)
                    .await;
            }
            SdkEvent::GroupText {
                group_id,
                sender,
                message_id,
                text,
                ts_ms,
            } => {
                let conv = ConvRef::group(&group_id);
                if let Some(target) = parse_recall(&text) {
                    let by = self.recaller(sender);
                    self.apply_recall_marker(&conv, target, by, false).await;
                } else if sender == self.username {
                    let msg = ChatMessage::new(message_id, sender, text, event_ts(ts_ms), true, MessageStatus::Sent);
                    self.echo(&conv, msg).await;
                } else {
                    let mentioned = self.mentions_me(&text);
                    let msg = ChatMessage::new(
                        message_id,
                        sender,
                        text,
                        event_ts(ts_ms),
                        false,
                        MessageStatus::Delivered,
                    );
                    self.receive(&conv, msg, mentioned, &mut follow).await;
                }
            }
            SdkEvent::GroupFile {
                group_id,
                sender,
                message_id,
                file,
                ts_ms,
            } => {
                let conv = ConvRef::group(&group_id);
                let mine = sender == self.username;
                let status = if mine {
                    MessageStatus::Sent
                } else {
                    MessageStatus::Delivered
                };
                let msg = with_attachment(
                    ChatMessage::new(message_id, sender, "", event_ts(ts_ms), mine, status),
                    file_attachment(file),
                );
                if mine {
                    self.echo(&conv, msg).await;
                } else {
                    self.receive(&conv, msg, false, &mut follow).await;
                }
            }
            SdkEvent::GroupInvite {
                group_id,
                sender,
                message_id,
                ..
            } => {
                if !self.group_invites.iter().any(|i| i.message_id == message_id) {
                    info!("[Bridge] 📨 收到入群邀请: group={}, from={}", group_id, sender);
                    self.group_invites.push(GroupInviteUi {
                        group_id,
                        sender,
                        message_id,
                    });
                }
            }
            SdkEvent::GroupNotice {
                group_id,
                kind,
                actor,
                target,
                role,
                ts_ms,
            } => {
                self.apply_group_notice(group_id, kind, actor, target, role, ts_ms, &mut follow)
                    .await;
            }
            SdkEvent::OutgoingText {
                peer,
                message_id,
                text,
                ts_ms,
            } => {
                let conv = ConvRef::peer(&peer);
                if let Some(target) = parse_recall(&text) {
                    self.apply_recall_marker(&conv, target, Recaller::Me, false).await;
                } else {
                    let me = self.username.clone();
                    let msg = ChatMessage::new(message_id, me, text, event_ts(ts_ms), true, MessageStatus::Sent);
                    self.echo(&conv, msg).await;
                }
            }
            SdkEvent::OutgoingFile {
                peer,
                message_id,
                file,
                ts_ms,
            } => {
                let conv = ConvRef::peer(&peer);
                let me = self.username.clone();
                let msg = ChatMessage::new(message_id, me, "", event_ts(ts_ms), true, MessageStatus::Sent);
                self.echo(&conv, with_attachment(msg, file_attachment(file))).await;
            }
            SdkEvent::OutgoingSticker {
                peer,
                message_id,
                sticker_id,
                ts_ms,
            } => {
                let conv = ConvRef::peer(&peer);
                let me = self.username.clone();
                let msg = ChatMessage::new(message_id, me, "", event_ts(ts_ms), true, MessageStatus::Sent);
                self.echo(&conv, with_attachment(msg, sticker(sticker_id))).await;
            }
            SdkEvent::OutgoingGroupText {
                group_id,
                message_id,
                text,
                ts_ms,
            } => {
                let conv = ConvRef::group(&group_id);
                if let Some(target) = parse_recall(&text) {
                    self.apply_recall_marker(&conv, target, Recaller::Me, false).await;
                } else {
                    let me = self.username.clone();
                    let msg = ChatMessage::new(message_id, me, text, event_ts(ts_ms), true, MessageStatus::Sent);
                    self.echo(&conv, msg).await;
                }
            }
            SdkEvent::OutgoingGroupFile {
                group_id,
                message_id,
                file,
                ts_ms,
            } => {
                let conv = ConvRef::group(&group_id);
                let me = self.username.clone();
                let msg = ChatMessage::new(message_id, me, "", event_ts(ts_ms), true, MessageStatus::Sent);
                self.echo(&conv, with_attachment(msg, file_attachment(file))).await;
            }
            SdkEvent::Delivery { peer, message_id } => {
                let conv = ConvRef::peer(&peer);
                self.outbox.remove(&message_id);
                self.touch_typing(&conv);
                let changed = self
                    .messages
                    .get_mut(&conv)
                    .is_some_and(|log| log.merge_status(&message_id, MessageStatus::Delivered));
                if changed {
                    self.mark_messages(&conv);
                }
            }
            SdkEvent::ReadReceipt { peer, message_id } => {
                let conv = ConvRef::peer(&peer);
                self.touch_typing(&conv);
                let changed = self
                    .messages
                    .get_mut(&conv)
                    .is_some_and(|log| log.mark_read_through(&message_id));
                if changed {
                    self.mark_messages(&conv);
                }
            }
            SdkEvent::Typing { peer, typing } => {
                if self.conversations.set_typing(&ConvRef::peer(&peer), typing) {
                    self.mark_conversations();
                }
            }
            SdkEvent::Presence { peer, online } => {
                self.touch_typing(&ConvRef::peer(&peer));
                let label = presence_label(online);
                if let Some(f) = self.friends.iter_mut().find(|f| f.username == peer) {
                    if f.status != label {
                        f.status = label.to_string();
                        self.mark_friends();
                    }
                }
            }
            SdkEvent::GroupCall(sig) => {
                if self.calls.apply_signal(&sig) {
                    self.mark_call_rooms();
                }
            }
            SdkEvent::MediaRelay(p) => {
                self.media_relay
                    .push(MediaRelayLog::from_payload(&p, false, now_ms()));
            }
            SdkEvent::GroupMediaRelay(p) => {
                self.media_relay
                    .push(MediaRelayLog::from_payload(&p, true, now_ms()));
            }
            SdkEvent::OfflinePayload(p) => {
                self.offline_payloads
                    .push(OfflinePayloadLog::from_payload(&p, now_ms()));
            }
        }
        follow
    }

    fn touch_typing(&mut self, conv: &ConvRef) {
        if self.conversations.clear_typing(conv) {
            self.mark_conversations();
        }
    }

    /// 收到他人的消息
    async fn receive(
        &mut self,
        conv: &ConvRef,
        msg: ChatMessage,
        mentioned: bool,
        follow: &mut Vec<FollowUp>,
    ) {
        self.ensure_conversation(conv).await;
        let id = msg.id.clone();
        let ts = msg.ts_ms;
        let log = self.ensure_log(conv).await;
        if !log.upsert(msg) {
            debug!("[Dispatch] 重复或已删除的消息: {}", id);
            self.touch_typing(conv);
            return;
        }
        let preview = log.get(&id).map(|m| m.preview_text()).unwrap_or_default();
        self.mark_messages(conv);
        let outcome = self.conversations.record_inbound(conv, preview, ts, mentioned);
        if outcome.counters_changed {
            self.persist_counters(conv).await;
        }
        if outcome.active && !conv.is_group && self.privacy.read_receipts_enabled {
            follow.push(FollowUp::ReadReceipt {
                peer: conv.id.clone(),
                message_id: id,
            });
        }
    }

    /// 自己发出的消息回显（本机或其他设备）
    async fn echo(&mut self, conv: &ConvRef, mut msg: ChatMessage) {
        msg.recall_deadline = self.recall_deadline_for(msg.ts_ms);
        self.ensure_conversation(conv).await;
        let id = msg.id.clone();
        let ts = msg.ts_ms;
        let log = self.ensure_log(conv).await;
        if !log.upsert(msg) {
            self.touch_typing(conv);
            return;
        }
        let preview = log.get(&id).map(|m| m.preview_text()).unwrap_or_default();
        self.mark_messages(conv);
        self.conversations.record_system(conv, preview, ts);
    }

    /// 本机发送（或重发）成功后写入消息；召回标记只触发召回，不作为正文展示
    pub async fn record_sent(&mut self, conv: &ConvRef, message_id: &str, payload: &OutgoingPayload) {
        if let OutgoingPayload::Text { text, .. } = payload {
            if let Some(target) = parse_recall(text) {
                self.apply_recall_marker(conv, target, Recaller::Me, true).await;
                return;
            }
        }
        let me = self.username.clone();
        let mut msg = ChatMessage::from_outgoing(message_id, me, payload, now_ms());
        msg.recall_deadline = Some(Instant::now() + self.recall_window);
        let ts = msg.ts_ms;
        self.ensure_conversation(conv).await;
        let log = self.ensure_log(conv).await;
        log.upsert(msg);
        let preview = log
            .get(message_id)
            .map(|m| m.preview_text())
            .unwrap_or_default();
        self.mark_messages(conv);
        self.conversations.record_outbound(conv, preview, ts);
    }

    /// 应用召回标记；只有原消息的发送者能召回，目标尚未加载时记下
    pub async fn apply_recall_marker(
        &mut self,
        conv: &ConvRef,
        target: &str,
        by: Recaller,
        keep_text: bool,
    ) -> bool {
        self.ensure_conversation(conv).await;
        self.touch_typing(conv);
        let changed = self.ensure_log(conv).await.apply_recall(target, by, keep_text);
        self.persist_message_prefs(conv).await;
        if changed {
            info!("[Bridge] ↩️ 召回 {} in {}", target, conv);
            self.mark_messages(conv);
            self.refresh_preview(conv);
        }
        changed
    }

    /// 群消息的发送者是否就是本机
    pub fn recaller(&self, sender: String) -> Recaller {
        if sender == self.username {
            Recaller::Me
        } else {
            Recaller::Peer(sender)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_group_notice(
        &mut self,
        group_id: String,
        kind: GroupNoticeKind,
        actor: String,
        target: String,
        role: u32,
        raw_ts_ms: u64,
        follow: &mut Vec<FollowUp>,
    ) {
        let ts_ms = event_ts(raw_ts_ms);
        let conv = ConvRef::group(&group_id);
        let text = notice_text(kind, &actor, &target, role);
        debug!("[Dispatch] 群通知 {}: {}", group_id, text);

        let me = self.username.clone();
        let removed_me = (kind == GroupNoticeKind::Kick && target == me)
            || (kind == GroupNoticeKind::Leave && actor == me);
        if removed_me {
            self.groups.retain(|g| g.id != group_id);
            self.group_members.remove(&group_id);
            if self.calls.remove_room(&group_id) {
                self.mark_call_rooms();
            }
        } else if kind == GroupNoticeKind::RoleSet {
            if let Some(m) = self
                .group_members
                .get_mut(&group_id)
                .and_then(|members| members.iter_mut().find(|m| m.username == target))
            {
                m.role = GroupMemberRole::from_code(role).unwrap_or(GroupMemberRole::Member);
            }
        } else if self.group_members.contains_key(&group_id) {
            follow.push(FollowUp::RefreshGroupMembers(group_id.clone()));
        }

        self.ensure_conversation(&conv).await;
        // 重复的通知事件得到同一个 ID，由 upsert 合并
        let id = derived_msg_id(&[
            &group_id,
            &format!("{:?}", kind),
            &actor,
            &target,
            &role.to_string(),
            &raw_ts_ms.to_string(),
        ]);
        let msg = ChatMessage::new(id, "", text.clone(), ts_ms, false, MessageStatus::Delivered);
        if !self.ensure_log(&conv).await.upsert(msg) {
            return;
        }
        self.mark_messages(&conv);
        self.conversations.record_system(&conv, text, ts_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::event::{GroupCallOp, GroupCallSignal, RelayPayload};
    use crate::bridge::friend::FriendUi;
    use crate::bridge::listener::Notification;
    use crate::bridge::serialization::CALL_ID_LEN;
    use tokio::time::Duration;

    fn state() -> BridgeState {
        let mut st = BridgeState::new(Duration::from_secs(120), Duration::from_millis(3500));
        st.username = "me".to_string();
        st.logged_in = true;
        st
    }

    fn chat(peer: &str, id: &str, text: &str) -> SdkEvent {
        SdkEvent::ChatText {
            peer: peer.into(),
            message_id: id.into(),
            text: text.into(),
            ts_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn inactive_inbound_counts_unread_without_receipt() {
        let mut st = state();
        let follow = st.apply_event(chat("alice", "m1", "hi")).await;
        assert!(follow.is_empty());
        let conv = st.conversations.get(&ConvRef::peer("alice")).unwrap();
        assert_eq!(conv.unread_count, 1);
        assert_eq!(conv.last_message, "hi");
        // 重复事件不再计数
        st.apply_event(chat("alice", "m1", "hi")).await;
        assert_eq!(
            st.conversations.get(&ConvRef::peer("alice")).unwrap().unread_count,
            1
        );
    }

    #[tokio::test]
    async fn active_inbound_sends_receipt() {
        let mut st = state();
        let alice = ConvRef::peer("alice");
        st.ensure_conversation(&alice).await;
        st.conversations.set_active(Some(alice.clone()));
        let follow = st.apply_event(chat("alice", "m1", "hi")).await;
        assert_eq!(
            follow,
            vec![FollowUp::ReadReceipt {
                peer: "alice".into(),
                message_id: "m1".into()
            }]
        );
        assert_eq!(st.conversations.get(&alice).unwrap().unread_count, 0);

        st.privacy.read_receipts_enabled = false;
        assert!(st.apply_event(chat("alice", "m2", "again")).await.is_empty());
    }

    #[tokio::test]
    async fn group_mention_counts_separately() {
        let mut st = state();
        st.apply_event(SdkEvent::GroupText {
            group_id: "g1".into(),
            sender: "bob".into(),
            message_id: "m1".into(),
            text: "ping @me".into(),
            ts_ms: 5,
        })
        .await;
        let conv = st.conversations.get(&ConvRef::group("g1")).unwrap();
        assert_eq!((conv.unread_count, conv.mention_count), (1, 1));
    }

    #[tokio::test]
    async fn recall_marker_is_never_shown_as_text() {
        let mut st = state();
        st.apply_event(chat("alice", "m2", "secret")).await;
        st.apply_event(chat("alice", "r1", "[recall]:m2")).await;
        let log = st.messages.get(&ConvRef::peer("alice")).unwrap();
        assert_eq!(log.items().len(), 1);
        let m = log.get("m2").unwrap();
        assert!(m.is_revoked);
        assert_eq!(m.body, "");
    }

    #[tokio::test]
    async fn recall_for_unloaded_message_applies_later() {
        let mut st = state();
        st.apply_event(SdkEvent::GroupText {
            group_id: "g1".into(),
            sender: "bob".into(),
            message_id: "r".into(),
            text: "[recall]:m9".into(),
            ts_ms: 1,
        })
        .await;
        st.apply_event(SdkEvent::GroupText {
            group_id: "g1".into(),
            sender: "bob".into(),
            message_id: "m9".into(),
            text: "late".into(),
            ts_ms: 2,
        })
        .await;
        let m = st.messages[&ConvRef::group("g1")].get("m9").unwrap().clone();
        assert!(m.is_revoked);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_noop() {
        let mut st = state();
        st.apply_event(SdkEvent::OutgoingText {
            peer: "alice".into(),
            message_id: "m1".into(),
            text: "yo".into(),
            ts_ms: 0,
        })
        .await;
        st.take_notifications();
        let delivery = SdkEvent::Delivery {
            peer: "alice".into(),
            message_id: "m1".into(),
        };
        st.apply_event(delivery.clone()).await;
        assert!(!st.take_notifications().is_empty());
        st.apply_event(delivery).await;
        assert!(st.take_notifications().is_empty());
        let log = &st.messages[&ConvRef::peer("alice")];
        assert_eq!(log.get("m1").unwrap().status, MessageStatus::Delivered);
        // 回显时刚发出，仍可召回
        assert!(log.get("m1").unwrap().recall_deadline.is_some());
    }

    #[tokio::test]
    async fn other_events_clear_typing() {
        let mut st = state();
        let alice = ConvRef::peer("alice");
        st.ensure_conversation(&alice).await;
        st.apply_event(SdkEvent::Typing {
            peer: "alice".into(),
            typing: true,
        })
        .await;
        assert!(st.conversations.get(&alice).unwrap().is_typing);
        st.apply_event(SdkEvent::Presence {
            peer: "alice".into(),
            online: true,
        })
        .await;
        assert!(!st.conversations.get(&alice).unwrap().is_typing);
    }

    #[tokio::test]
    async fn presence_updates_friend_status() {
        let mut st = state();
        st.friends.push(FriendUi {
            username: "bob".into(),
            remark: String::new(),
            status: String::new(),
        });
        st.apply_event(SdkEvent::Presence {
            peer: "bob".into(),
            online: true,
        })
        .await;
        assert_eq!(st.friends[0].status, "online");
        let notes = st.take_notifications();
        assert!(notes.iter().any(|n| matches!(n, Notification::Friends(_))));
    }

    #[tokio::test]
    async fn group_call_leave_removes_room() {
        let mut st = state();
        let sig = |op| {
            SdkEvent::GroupCall(GroupCallSignal {
                group_id: "g1".into(),
                sender: "bob".into(),
                call_id: [9; CALL_ID_LEN],
                key_id: 1,
                op,
                media_flags: 0x03,
            })
        };
        st.apply_event(sig(GroupCallOp::Create)).await;
        assert!(st.calls.room("g1").unwrap().video);
        st.apply_event(sig(GroupCallOp::Leave)).await;
        assert!(st.calls.rooms().is_empty());
    }

    #[tokio::test]
    async fn notices_become_system_messages() {
        let mut st = state();
        st.group_members.insert("g1".into(), Vec::new());
        let follow = st
            .apply_event(SdkEvent::GroupNotice {
                group_id: "g1".into(),
                kind: GroupNoticeKind::Join,
                actor: "bob".into(),
                target: "carol".into(),
                role: 0,
                ts_ms: 10,
            })
            .await;
        assert_eq!(follow, vec![FollowUp::RefreshGroupMembers("g1".into())]);
        let conv = st.conversations.get(&ConvRef::group("g1")).unwrap();
        assert_eq!(conv.last_message, "carol joined the group");
        assert_eq!(conv.unread_count, 0);
    }

    #[tokio::test]
    async fn duplicate_notice_is_merged() {
        let mut st = state();
        let notice = |ts_ms| SdkEvent::GroupNotice {
            group_id: "g1".into(),
            kind: GroupNoticeKind::Leave,
            actor: "bob".into(),
            target: String::new(),
            role: 0,
            ts_ms,
        };
        st.apply_event(notice(0)).await;
        st.apply_event(notice(0)).await;
        st.apply_event(notice(20)).await;
        st.apply_event(notice(20)).await;
        let log = st.messages.get(&ConvRef::group("g1")).unwrap();
        assert_eq!(log.items().len(), 2);
        assert!(log.items().iter().all(|m| m.body == "bob left the group"));
    }

    #[tokio::test]
    async fn relay_events_are_logged() {
        let mut st = state();
        let payload = RelayPayload {
            peer: "alice".into(),
            sender: "alice".into(),
            group_id: String::new(),
            payload: vec![1, 2, 3],
        };
        st.apply_event(SdkEvent::MediaRelay(payload.clone())).await;
        st.apply_event(SdkEvent::OfflinePayload(payload)).await;
        let logs = st.media_relay.snapshot();
        assert_eq!(logs[0].payload_preview, "010203");
        assert!(!logs[0].is_group);
        assert_eq!(st.offline_payloads.len(), 1);
    }
}
