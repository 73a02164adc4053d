use crate::bridge::client::{required, ClientBridge};
use crate::bridge::conversation::Conversation;
use crate::bridge::prefs::keys;
use crate::bridge::types::{BridgeError, BridgeResult, ConvRef};
use tracing::{debug, warn};

pub const CONVERSATION_NOT_FOUND: &str = "Conversation not found";

impl ClientBridge {
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.state.lock().await.conversations.sorted()
    }

    pub async fn total_unread(&self) -> u32 {
        self.inner.state.lock().await.conversations.total_unread()
    }

    pub async fn active_conversation(&self) -> Option<ConvRef> {
        self.inner.state.lock().await.conversations.active().cloned()
    }

    /// 打开会话：清零计数，并对最后一条对端消息补发已读回执
    pub async fn set_active_conversation(&self, conv: &ConvRef) -> BridgeResult<()> {
        let native = self.ready(false).await?;
        required(&conv.id, "Conversation id is empty")?;
        let receipt = {
            let mut st = self.inner.state.lock().await;
            st.ensure_conversation(conv).await;
            if st.conversations.set_active(Some(conv.clone())) {
                st.persist_counters(conv).await;
            }
            st.mark_conversations();
            let receipt = if !conv.is_group && st.logged_in && st.privacy.read_receipts_enabled {
                st.messages
                    .get(conv)
                    .and_then(|log| log.items().iter().rev().find(|m| !m.is_mine))
                    .map(|m| m.id.clone())
            } else {
                None
            };
            self.flush(st);
            receipt
        };
        debug!("[Bridge] 👀 打开会话 {}", conv);
        if let Some(message_id) = receipt {
            let peer = conv.id.clone();
            let result = native
                .call("read_receipt", move |sdk| sdk.send_read_receipt(&peer, &message_id))
                .await;
            if let Err(e) = result {
                warn!("[Bridge] ⚠️ 已读回执发送失败 {}: {}", conv, e);
            }
        }
        Ok(())
    }

    /// 离开当前会话；之后的新消息重新计入未读
    pub async fn clear_active_conversation(&self) -> BridgeResult<()> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        if st.conversations.active().is_none() {
            return Ok(());
        }
        st.conversations.set_active(None);
        st.mark_conversations();
        self.flush(st);
        Ok(())
    }

    pub async fn mark_read(&self, conv: &ConvRef) -> BridgeResult<()> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        if !st.conversations.contains(conv) {
            return Err(BridgeError::not_found(CONVERSATION_NOT_FOUND));
        }
        if st.conversations.mark_read(conv) {
            st.persist_counters(conv).await;
            st.mark_conversations();
            self.flush(st);
        }
        Ok(())
    }

    /// 会话置顶开关，返回新状态
    pub async fn toggle_pin(&self, conv: &ConvRef) -> BridgeResult<bool> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        let pinned = st
            .conversations
            .toggle_pin(conv)
            .ok_or_else(|| BridgeError::not_found(CONVERSATION_NOT_FOUND))?;
        st.persist_bool(&keys::conv_pinned(conv), pinned).await;
        st.mark_conversations();
        self.flush(st);
        Ok(pinned)
    }

    /// 免打扰开关，返回新状态
    pub async fn toggle_mute(&self, conv: &ConvRef) -> BridgeResult<bool> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        let muted = st
            .conversations
            .toggle_mute(conv)
            .ok_or_else(|| BridgeError::not_found(CONVERSATION_NOT_FOUND))?;
        st.persist_bool(&keys::conv_muted(conv), muted).await;
        st.mark_conversations();
        self.flush(st);
        Ok(muted)
    }

    /// 草稿只在内存中保留，空白草稿视为清除
    pub async fn set_draft(&self, conv: &ConvRef, draft: &str) -> BridgeResult<()> {
        self.ready(false).await?;
        let mut st = self.inner.state.lock().await;
        if !st.conversations.set_draft(conv, Some(draft.to_string())) {
            return Err(BridgeError::not_found(CONVERSATION_NOT_FOUND));
        }
        st.mark_conversations();
        self.flush(st);
        Ok(())
    }

    pub async fn send_typing(&self, peer: &str, typing: bool) -> BridgeResult<()> {
        self.ready(true).await?;
        let peer = required(peer, "Peer is empty")?;
        self.call_simple(true, "typing", move |sdk| sdk.send_typing(&peer, typing))
            .await
    }

    pub async fn send_presence(&self, peer: &str, online: bool) -> BridgeResult<()> {
        self.ready(true).await?;
        let peer = required(peer, "Peer is empty")?;
        self.call_simple(true, "presence", move |sdk| sdk.send_presence(&peer, online))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::client::tests::{
        bridge_with, logged_in, test_options, wait_until, RecordingListener,
    };
    use crate::bridge::event::event_type;
    use crate::bridge::native::{MockConnector, MockSdk, RawEvent};
    use std::sync::Arc;

    fn text_from(peer: &str, id: &str) -> RawEvent {
        RawEvent {
            type_id: event_type::CHAT_TEXT,
            peer: peer.into(),
            message_id: id.into(),
            text: "hi".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn opening_a_conversation_clears_unread_and_sends_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        let alice = ConvRef::peer("alice");
        control.push_event(text_from("alice", "in-1"));
        control.push_event(text_from("alice", "in-2"));
        bridge.poll_once().await;
        assert_eq!(bridge.total_unread().await, 2);

        control.clear_calls();
        bridge.set_active_conversation(&alice).await.unwrap();
        assert_eq!(bridge.total_unread().await, 0);
        assert_eq!(bridge.active_conversation().await, Some(alice.clone()));
        assert!(control.calls().contains(&"read_receipt:alice:in-2".to_string()));

        control.push_event(text_from("alice", "in-3"));
        bridge.poll_once().await;
        assert_eq!(bridge.total_unread().await, 0);
    }

    #[tokio::test]
    async fn leaving_a_conversation_notifies_and_counts_unread_again() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let (sdk, control) = MockSdk::new();
        let bridge = ClientBridge::with_listener(test_options(dir.path()), listener.clone());
        bridge
            .clear_active_conversation()
            .await
            .unwrap_err();
        bridge.init(None, &MockConnector::new(sdk)).await.unwrap();
        bridge.login("me", "pw").await.unwrap();
        let alice = ConvRef::peer("alice");
        bridge.set_active_conversation(&alice).await.unwrap();
        let conv_events = |l: &RecordingListener| {
            l.names().iter().filter(|n| n.starts_with("conversations:")).count()
        };
        assert!(wait_until(|| conv_events(&listener) > 0).await);
        let before = conv_events(&listener);

        bridge.clear_active_conversation().await.unwrap();
        assert_eq!(bridge.active_conversation().await, None);
        assert!(wait_until(|| conv_events(&listener) > before).await);

        control.push_event(text_from("alice", "in-9"));
        bridge.poll_once().await;
        assert_eq!(bridge.total_unread().await, 1);
    }

    #[tokio::test]
    async fn receipts_respect_privacy_switch() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        bridge.set_read_receipts_enabled(false).await.unwrap();
        control.push_event(text_from("alice", "in-1"));
        bridge.poll_once().await;
        control.clear_calls();
        bridge
            .set_active_conversation(&ConvRef::peer("alice"))
            .await
            .unwrap();
        assert!(control.calls().iter().all(|c| !c.starts_with("read_receipt")));
    }

    #[tokio::test]
    async fn pin_and_mute_affect_ordering_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        control.push_event(text_from("alice", "a1"));
        control.push_event(text_from("bob", "b1"));
        bridge.poll_once().await;

        assert!(bridge.toggle_pin(&ConvRef::peer("alice")).await.unwrap());
        assert_eq!(bridge.conversations().await[0].id, "alice");
        assert!(bridge.toggle_mute(&ConvRef::peer("bob")).await.unwrap());
        assert_eq!(bridge.total_unread().await, 1);

        let err = bridge.toggle_pin(&ConvRef::group("ghost")).await.unwrap_err();
        assert_eq!(err, BridgeError::not_found(CONVERSATION_NOT_FOUND));
        assert!(bridge.last_error().await.is_empty());
    }

    #[tokio::test]
    async fn drafts_are_cleared_by_sending() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = bridge_with(test_options(dir.path())).await;
        bridge.login("me", "pw").await.unwrap();
        bridge.poll_once().await;
        let alice = ConvRef::peer("alice");
        bridge.set_draft(&alice, "half a thought").await.unwrap();
        let draft = |list: Vec<Conversation>| list.into_iter().find(|c| c.id == "alice").and_then(|c| c.draft);
        assert_eq!(draft(bridge.conversations().await).as_deref(), Some("half a thought"));
        bridge.send_text(&alice, "done", None).await.unwrap();
        assert_eq!(draft(bridge.conversations().await), None);
    }

    #[tokio::test]
    async fn typing_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = bridge_with(test_options(dir.path())).await;
        let err = bridge.send_typing("alice", true).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
        let err = bridge.send_typing("", true).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
        let err = bridge.send_presence(" ", false).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
    }
}
