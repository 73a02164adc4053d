//! 单个会话的消息列表维护
//!
//! 负责乐观写入与原生事件的合并、召回、删除撤销、置顶与收藏。
//! 所有方法都是纯内存操作，时间由调用方传入。

use crate::bridge::message::models::{ChatMessage, MessageStatus, PendingDelete};
use std::collections::{HashMap, HashSet};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// 删除请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// 消息已隐藏，进入撤销窗口
    Hidden,
    /// 已在撤销窗口内，计时重新开始
    Restarted,
    /// 早已永久删除，无操作
    AlreadyDeleted,
}

/// 召回标记的发起方
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recaller {
    /// 本机发送或本机回显
    Me,
    /// 对端或其他群成员
    Peer(String),
}

impl Recaller {
    /// 只有消息的发送者本人可以召回
    fn owns(&self, msg: &ChatMessage) -> bool {
        match self {
            Recaller::Me => msg.is_mine,
            Recaller::Peer(sender) => !msg.is_mine && msg.sender == *sender,
        }
    }
}

/// 会话消息列表
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    items: Vec<ChatMessage>,
    pending_deletes: HashMap<String, PendingDelete>,
    deleted: HashSet<String>,
    recalled: HashSet<String>,
    /// 目标尚未加载的召回，等消息出现后再核对发送者
    unverified_recalls: HashMap<String, Recaller>,
    pinned: Option<String>,
    favorites: HashSet<String>,
}

impl MessageLog {
    /// 用已持久化的集合恢复
    pub fn with_persisted(
        deleted: HashSet<String>,
        recalled: HashSet<String>,
        pinned: Option<String>,
        favorites: HashSet<String>,
    ) -> Self {
        Self {
            deleted,
            recalled,
            pinned,
            favorites,
            ..Default::default()
        }
    }

    pub fn items(&self) -> &[ChatMessage] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.items.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.items.last()
    }

    pub fn deleted_ids(&self) -> &HashSet<String> {
        &self.deleted
    }

    pub fn recalled_ids(&self) -> &HashSet<String> {
        &self.recalled
    }

    pub fn favorite_ids(&self) -> &HashSet<String> {
        &self.favorites
    }

    pub fn pinned_id(&self) -> Option<&str> {
        self.pinned.as_deref()
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.deleted.contains(id) || self.pending_deletes.contains_key(id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|m| m.id == id)
    }

    /// 写入或合并一条消息，返回可见列表是否变化
    ///
    /// 已存在的消息只合并状态与附件进度，不覆盖本地更权威的字段。
    pub fn upsert(&mut self, mut msg: ChatMessage) -> bool {
        if self.is_hidden(&msg.id) {
            debug!("[MsgLog] 跳过已删除消息: {}", msg.id);
            return false;
        }
        if let Some(idx) = self.position(&msg.id) {
            let existing = &mut self.items[idx];
            let merged = existing.status.merge(msg.status);
            if merged == existing.status {
                return false;
            }
            existing.status = merged;
            return true;
        }
        if self.recalled.contains(&msg.id) {
            msg.revoke(false);
        } else if let Some(by) = self.unverified_recalls.remove(&msg.id) {
            if by.owns(&msg) {
                msg.revoke(false);
                self.recalled.insert(msg.id.clone());
            } else {
                debug!("[MsgLog] 忽略非发送者的召回: {}", msg.id);
            }
        }
        let pos = self
            .items
            .iter()
            .rposition(|m| m.ts_ms <= msg.ts_ms)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.items.insert(pos, msg);
        true
    }

    /// 只合并投递状态（回执事件），重复回执不产生变化
    pub fn merge_status(&mut self, id: &str, status: MessageStatus) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let m = &mut self.items[idx];
        let merged = m.status.merge(status);
        if merged == m.status {
            return false;
        }
        m.status = merged;
        true
    }

    /// 已读回执：把该消息及其之前的己方消息都标为已读
    pub fn mark_read_through(&mut self, id: &str) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let mut changed = false;
        for m in self.items[..=idx].iter_mut().filter(|m| m.is_mine) {
            let merged = m.status.merge(MessageStatus::Read);
            if merged != m.status {
                m.status = merged;
                changed = true;
            }
        }
        changed
    }

    /// 应用召回；只接受发送者本人的标记，消息尚未加载时先记下
    pub fn apply_recall(&mut self, id: &str, by: Recaller, keep_text: bool) -> bool {
        if let Some(pending) = self.pending_deletes.get_mut(id) {
            if !by.owns(&pending.message) {
                debug!("[MsgLog] 忽略非发送者的召回: {}", id);
                return false;
            }
            pending.message.revoke(keep_text);
            self.recalled.insert(id.to_string());
            return false;
        }
        let Some(idx) = self.position(id) else {
            self.unverified_recalls.insert(id.to_string(), by);
            return false;
        };
        let m = &mut self.items[idx];
        if !by.owns(m) {
            debug!("[MsgLog] 忽略非发送者的召回: {}", id);
            return false;
        }
        self.recalled.insert(id.to_string());
        if m.is_revoked {
            return false;
        }
        m.revoke(keep_text);
        true
    }

    /// 取出自己召回消息的原文（只能取一次）
    pub fn take_recalled_text(&mut self, id: &str) -> Option<String> {
        let idx = self.position(id)?;
        self.items[idx].recalled_text.take()
    }

    /// 乐观删除
    pub fn delete(
        &mut self,
        id: &str,
        now: Instant,
        grace: Duration,
    ) -> Option<DeleteOutcome> {
        if self.deleted.contains(id) {
            return Some(DeleteOutcome::AlreadyDeleted);
        }
        if let Some(pending) = self.pending_deletes.get_mut(id) {
            pending.deadline = now + grace;
            return Some(DeleteOutcome::Restarted);
        }
        let idx = self.position(id)?;
        let message = self.items.remove(idx);
        if self.pinned.as_deref() == Some(id) {
            self.pinned = None;
        }
        self.pending_deletes.insert(
            id.to_string(),
            PendingDelete {
                message,
                index: idx,
                deadline: now + grace,
            },
        );
        Some(DeleteOutcome::Hidden)
    }

    /// 撤销删除，仅在截止时刻之前有效
    pub fn undo_delete(&mut self, id: &str, now: Instant) -> bool {
        match self.pending_deletes.get(id) {
            Some(p) if now < p.deadline => {}
            _ => return false,
        }
        let Some(pending) = self.pending_deletes.remove(id) else {
            return false;
        };
        let idx = pending.index.min(self.items.len());
        self.items.insert(idx, pending.message);
        true
    }

    /// 提交所有已到期的删除，返回被提交的 ID
    pub fn commit_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending_deletes
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending_deletes.remove(id);
            self.favorites.remove(id);
            self.deleted.insert(id.clone());
        }
        expired
    }

    /// 不等撤销窗口，立即提交所有待删除（登出或释放前）
    pub fn commit_all(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.pending_deletes.drain().map(|(id, _)| id).collect();
        for id in &ids {
            self.favorites.remove(id);
            self.deleted.insert(id.clone());
        }
        ids
    }

    pub fn has_pending_deletes(&self) -> bool {
        !self.pending_deletes.is_empty()
    }

    /// 置顶开关：同一 ID 再次调用即取消置顶
    pub fn toggle_pin(&mut self, id: &str) -> Option<String> {
        if self.pinned.as_deref() == Some(id) {
            self.pinned = None;
        } else {
            self.pinned = Some(id.to_string());
        }
        self.pinned.clone()
    }

    /// 收藏开关，返回是否已收藏
    pub fn toggle_favorite(&mut self, id: &str) -> bool {
        if self.favorites.remove(id) {
            false
        } else {
            self.favorites.insert(id.to_string());
            true
        }
    }

    /// 用历史记录整体替换可见列表（过滤已删除，应用已召回）
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.items.clear();
        for m in messages {
            self.upsert(m);
        }
    }

    /// 清空消息（删除聊天记录后）；已删除集合作为墓碑保留
    pub fn clear(&mut self) {
        self.items.clear();
        self.pending_deletes.clear();
        self.recalled.clear();
        self.unverified_recalls.clear();
        self.favorites.clear();
        self.pinned = None;
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.items.iter_mut().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, ts: i64, mine: bool) -> ChatMessage {
        ChatMessage::new(id, if mine { "me" } else { "bob" }, format!("body {}", id), ts, mine, MessageStatus::Sent)
    }

    fn log_with(ids: &[&str]) -> MessageLog {
        let mut log = MessageLog::default();
        for (i, id) in ids.iter().enumerate() {
            log.upsert(msg(id, i as i64, true));
        }
        log
    }

    const GRACE: Duration = Duration::from_millis(3500);

    #[test]
    fn duplicate_receipt_is_noop() {
        let mut log = log_with(&["m1"]);
        assert!(log.merge_status("m1", MessageStatus::Delivered));
        assert!(!log.merge_status("m1", MessageStatus::Delivered));
        assert!(log.merge_status("m1", MessageStatus::Read));
        // 迟到的 Sent 回显不会覆盖 Read
        assert!(!log.upsert(msg("m1", 0, true)));
        assert_eq!(log.get("m1").unwrap().status, MessageStatus::Read);
    }

    #[test]
    fn upsert_keeps_timestamp_order() {
        let mut log = MessageLog::default();
        log.upsert(msg("b", 20, false));
        log.upsert(msg("a", 10, false));
        log.upsert(msg("c", 30, false));
        let ids: Vec<_> = log.items().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_then_undo_restores_exact_state() {
        let mut log = log_with(&["m1", "m2", "m3"]);
        let before: Vec<ChatMessage> = log.items().to_vec();
        let now = Instant::now();
        assert_eq!(log.delete("m2", now, GRACE), Some(DeleteOutcome::Hidden));
        assert!(log.get("m2").is_none());
        assert!(log.undo_delete("m2", now + Duration::from_millis(1000)));
        assert_eq!(log.items(), before.as_slice());
        // 再次撤销无效
        assert!(!log.undo_delete("m2", now));
    }

    #[test]
    fn delete_after_grace_is_terminal() {
        let mut log = log_with(&["m1"]);
        let now = Instant::now();
        log.delete("m1", now, GRACE);
        let later = now + Duration::from_millis(3600);
        assert_eq!(log.commit_expired(later), vec!["m1".to_string()]);
        assert!(!log.undo_delete("m1", later));
        assert_eq!(
            log.delete("m1", later, GRACE),
            Some(DeleteOutcome::AlreadyDeleted)
        );
        assert!(log.deleted_ids().contains("m1"));
        // 历史重载时仍然被过滤
        log.replace_all(vec![msg("m1", 0, true)]);
        assert!(log.items().is_empty());
    }

    #[test]
    fn second_delete_restarts_timer() {
        let mut log = log_with(&["m1", "m2"]);
        let now = Instant::now();
        log.delete("m1", now, GRACE);
        let t1 = now + Duration::from_millis(3000);
        assert_eq!(log.delete("m1", t1, GRACE), Some(DeleteOutcome::Restarted));
        assert_eq!(log.items().len(), 1);
        // 原截止时刻已过，但计时已重置
        assert!(log.commit_expired(now + Duration::from_millis(4000)).is_empty());
        assert!(log.undo_delete("m1", now + Duration::from_millis(6000)));
        assert_eq!(log.items().len(), 2);
    }

    #[test]
    fn delete_unknown_is_none() {
        let mut log = log_with(&["m1"]);
        assert_eq!(log.delete("nope", Instant::now(), GRACE), None);
    }

    #[test]
    fn pin_is_a_toggle() {
        let mut log = log_with(&["m1", "m2"]);
        assert_eq!(log.toggle_pin("m1"), Some("m1".to_string()));
        assert_eq!(log.toggle_pin("m2"), Some("m2".to_string()));
        assert_eq!(log.toggle_pin("m2"), None);
        assert_eq!(log.pinned_id(), None);
    }

    #[test]
    fn recall_before_message_arrives() {
        let mut log = MessageLog::default();
        assert!(!log.apply_recall("m9", Recaller::Peer("bob".into()), false));
        log.upsert(msg("m9", 5, false));
        let m = log.get("m9").unwrap();
        assert!(m.is_revoked);
        assert_eq!(m.body, "");
    }

    #[test]
    fn recall_text_taken_once() {
        let mut log = log_with(&["m1"]);
        assert!(log.apply_recall("m1", Recaller::Me, true));
        assert!(!log.apply_recall("m1", Recaller::Me, true));
        assert_eq!(log.take_recalled_text("m1").as_deref(), Some("body m1"));
        assert_eq!(log.take_recalled_text("m1"), None);
    }

    #[test]
    fn read_receipt_covers_earlier_messages() {
        let mut log = log_with(&["m1", "m2", "m3"]);
        assert!(log.mark_read_through("m2"));
        assert_eq!(log.get("m1").unwrap().status, MessageStatus::Read);
        assert_eq!(log.get("m2").unwrap().status, MessageStatus::Read);
        assert_eq!(log.get("m3").unwrap().status, MessageStatus::Sent);
        assert!(!log.mark_read_through("m2"));
    }

    #[test]
    fn favorites_toggle() {
        let mut log = log_with(&["m1"]);
        assert!(log.toggle_favorite("m1"));
        assert!(!log.toggle_favorite("m1"));
        assert!(log.favorite_ids().is_empty());
    }

    #[test]
    fn only_the_sender_can_recall() {
        let mut log = MessageLog::default();
        log.upsert(msg("mine", 1, true));
        log.upsert(msg("theirs", 2, false));
        assert!(!log.apply_recall("mine", Recaller::Peer("bob".into()), false));
        assert!(!log.apply_recall("theirs", Recaller::Peer("carol".into()), false));
        assert!(!log.apply_recall("theirs", Recaller::Me, false));
        assert!(!log.get("mine").unwrap().is_revoked);
        assert!(!log.get("theirs").unwrap().is_revoked);
        assert!(log.recalled_ids().is_empty());

        assert!(log.apply_recall("theirs", Recaller::Peer("bob".into()), false));
        assert!(log.get("theirs").unwrap().is_revoked);
    }

    #[test]
    fn early_recall_from_another_sender_is_dropped() {
        let mut log = MessageLog::default();
        log.apply_recall("m9", Recaller::Peer("mallory".into()), false);
        log.upsert(msg("m9", 5, false));
        assert!(!log.get("m9").unwrap().is_revoked);
        assert!(log.recalled_ids().is_empty());
    }

    #[test]
    fn clear_drops_recalled_and_favorites() {
        let mut log = log_with(&["m1", "m2"]);
        log.apply_recall("m1", Recaller::Me, false);
        log.toggle_favorite("m2");
        log.toggle_pin("m2");
        log.clear();
        assert!(log.items().is_empty());
        assert!(log.recalled_ids().is_empty());
        assert!(log.favorite_ids().is_empty());
        assert_eq!(log.pinned_id(), None);
    }

    #[test]
    fn commit_all_ignores_the_grace_window() {
        let mut log = log_with(&["m1", "m2"]);
        let now = Instant::now();
        log.delete("m1", now, GRACE);
        assert_eq!(log.commit_all(), vec!["m1".to_string()]);
        assert!(!log.undo_delete("m1", now));
        assert!(log.deleted_ids().contains("m1"));
        assert!(!log.has_pending_deletes());
    }
}
