//! 会话簿：未读、@、输入状态与置顶/免打扰的本地维护

use crate::bridge::conversation::models::{Conversation, ConversationPrefs};
use crate::bridge::types::ConvRef;
use std::collections::HashMap;
use tracing::debug;

/// 收到消息后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundOutcome {
    /// 会话当前是否处于打开状态（需要立即发送已读回执）
    pub active: bool,
    /// 未读/@ 计数是否发生变化（需要持久化）
    pub counters_changed: bool,
}

#[derive(Debug, Default)]
pub struct ConversationBook {
    convs: HashMap<ConvRef, Conversation>,
    active: Option<ConvRef>,
}

impl ConversationBook {
    /// 会话不存在时创建，返回是否新建
    pub fn ensure(&mut self, key: &ConvRef, name: &str) -> bool {
        if let Some(conv) = self.convs.get_mut(key) {
            conv.rename(name);
            return false;
        }
        debug!("[ConvBook] 🆕 新会话: {}", key);
        self.convs.insert(key.clone(), Conversation::new(key, name));
        true
    }

    pub fn get(&self, key: &ConvRef) -> Option<&Conversation> {
        self.convs.get(key)
    }

    pub fn contains(&self, key: &ConvRef) -> bool {
        self.convs.contains_key(key)
    }

    pub fn remove(&mut self, key: &ConvRef) -> bool {
        if self.active.as_ref() == Some(key) {
            self.active = None;
        }
        self.convs.remove(key).is_some()
    }

    pub fn apply_prefs(&mut self, key: &ConvRef, prefs: ConversationPrefs) {
        if let Some(conv) = self.convs.get_mut(key) {
            conv.is_pinned = prefs.pinned;
            conv.is_muted = prefs.muted;
            conv.unread_count = prefs.unread;
            conv.mention_count = prefs.mention;
        }
    }

    pub fn prefs(&self, key: &ConvRef) -> Option<ConversationPrefs> {
        self.convs.get(key).map(|c| ConversationPrefs {
            pinned: c.is_pinned,
            muted: c.is_muted,
            unread: c.unread_count,
            mention: c.mention_count,
        })
    }

    pub fn active(&self) -> Option<&ConvRef> {
        self.active.as_ref()
    }

    pub fn is_active(&self, key: &ConvRef) -> bool {
        self.active.as_ref() == Some(key)
    }

    /// 打开会话：清零未读与 @ 计数，返回计数是否变化
    pub fn set_active(&mut self, key: Option<ConvRef>) -> bool {
        self.active = key;
        match self.active.clone() {
            Some(k) => self.mark_read(&k),
            None => false,
        }
    }

    /// 收到一条消息
    pub fn record_inbound(
        &mut self,
        key: &ConvRef,
        preview: String,
        ts_ms: i64,
        mentioned: bool,
    ) -> InboundOutcome {
        let active = self.is_active(key);
        let Some(conv) = self.convs.get_mut(key) else {
            return InboundOutcome {
                active,
                counters_changed: false,
            };
        };
        conv.is_typing = false;
        conv.touch(preview, ts_ms);
        if active {
            return InboundOutcome {
                active,
                counters_changed: false,
            };
        }
        conv.unread_count = conv.unread_count.saturating_add(1);
        if mentioned {
            conv.mention_count = conv.mention_count.saturating_add(1);
        }
        InboundOutcome {
            active,
            counters_changed: true,
        }
    }

    /// 自己发出（或其他设备同步来）的消息
    pub fn record_outbound(&mut self, key: &ConvRef, preview: String, ts_ms: i64) {
        if let Some(conv) = self.convs.get_mut(key) {
            conv.is_typing = false;
            conv.draft = None;
            conv.touch(preview, ts_ms);
        }
    }

    /// 系统通知（入群、退群等），不计入未读
    pub fn record_system(&mut self, key: &ConvRef, preview: String, ts_ms: i64) {
        if let Some(conv) = self.convs.get_mut(key) {
            conv.is_typing = false;
            conv.touch(preview, ts_ms);
        }
    }

    /// 刷新摘要（召回、删除后）
    pub fn set_preview(&mut self, key: &ConvRef, preview: String) {
        if let Some(conv) = self.convs.get_mut(key) {
            conv.last_message = preview;
        }
    }

    pub fn set_typing(&mut self, key: &ConvRef, typing: bool) -> bool {
        match self.convs.get_mut(key) {
            Some(conv) if conv.is_typing != typing => {
                conv.is_typing = typing;
                true
            }
            _ => false,
        }
    }

    /// 其他任何事件都会清除输入状态，避免丢失的停止信号导致状态卡住
    pub fn clear_typing(&mut self, key: &ConvRef) -> bool {
        self.set_typing(key, false)
    }

    pub fn toggle_pin(&mut self, key: &ConvRef) -> Option<bool> {
        let conv = self.convs.get_mut(key)?;
        conv.is_pinned = !conv.is_pinned;
        Some(conv.is_pinned)
    }

    pub fn toggle_mute(&mut self, key: &ConvRef) -> Option<bool> {
        let conv = self.convs.get_mut(key)?;
        conv.is_muted = !conv.is_muted;
        Some(conv.is_muted)
    }

    pub fn mark_read(&mut self, key: &ConvRef) -> bool {
        match self.convs.get_mut(key) {
            Some(conv) if conv.unread_count > 0 || conv.mention_count > 0 => {
                conv.unread_count = 0;
                conv.mention_count = 0;
                true
            }
            _ => false,
        }
    }

    pub fn set_draft(&mut self, key: &ConvRef, draft: Option<String>) -> bool {
        let Some(conv) = self.convs.get_mut(key) else {
            return false;
        };
        conv.draft = draft.filter(|d| !d.trim().is_empty());
        true
    }

    /// 排序后的会话列表：置顶优先，其次按最近活动时间倒序
    pub fn sorted(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.convs.values().cloned().collect();
        list.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.last_activity_ms.cmp(&a.last_activity_ms))
                .then(a.name.cmp(&b.name))
        });
        list
    }

    /// 未免打扰会话的未读总数
    pub fn total_unread(&self) -> u32 {
        self.convs
            .values()
            .filter(|c| !c.is_muted)
            .map(|c| c.unread_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_on_inactive_increments_once() {
        let mut book = ConversationBook::default();
        let alice = ConvRef::peer("alice");
        book.ensure(&alice, "Alice");
        let out = book.record_inbound(&alice, "hi".into(), 10, false);
        assert!(!out.active);
        assert!(out.counters_changed);
        assert_eq!(book.get(&alice).unwrap().unread_count, 1);
    }

    #[test]
    fn inbound_on_active_keeps_zero() {
        let mut book = ConversationBook::default();
        let alice = ConvRef::peer("alice");
        book.ensure(&alice, "Alice");
        book.set_active(Some(alice.clone()));
        let out = book.record_inbound(&alice, "hi".into(), 10, false);
        assert!(out.active);
        assert_eq!(book.get(&alice).unwrap().unread_count, 0);
    }

    #[test]
    fn opening_conversation_clears_counters() {
        let mut book = ConversationBook::default();
        let g = ConvRef::group("g1");
        book.ensure(&g, "Team");
        book.record_inbound(&g, "@me hi".into(), 10, true);
        assert_eq!(book.get(&g).unwrap().mention_count, 1);
        assert!(book.set_active(Some(g.clone())));
        let conv = book.get(&g).unwrap();
        assert_eq!((conv.unread_count, conv.mention_count), (0, 0));
    }

    #[test]
    fn any_event_clears_typing() {
        let mut book = ConversationBook::default();
        let alice = ConvRef::peer("alice");
        book.ensure(&alice, "");
        assert!(book.set_typing(&alice, true));
        book.record_inbound(&alice, "x".into(), 1, false);
        assert!(!book.get(&alice).unwrap().is_typing);
    }

    #[test]
    fn pinned_first_then_recent() {
        let mut book = ConversationBook::default();
        let a = ConvRef::peer("a");
        let b = ConvRef::peer("b");
        let c = ConvRef::group("c");
        for k in [&a, &b, &c] {
            book.ensure(k, "");
        }
        book.record_outbound(&a, "old".into(), 10);
        book.record_outbound(&b, "new".into(), 20);
        book.toggle_pin(&c);
        let ids: Vec<_> = book.sorted().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn muted_conversations_excluded_from_total() {
        let mut book = ConversationBook::default();
        let a = ConvRef::peer("a");
        let b = ConvRef::peer("b");
        book.ensure(&a, "");
        book.ensure(&b, "");
        book.record_inbound(&a, "x".into(), 1, false);
        book.record_inbound(&b, "y".into(), 2, false);
        book.toggle_mute(&b);
        assert_eq!(book.total_unread(), 1);
    }
}
