//! 桥接层监听器回调接口

use crate::bridge::call::{GroupCallRoomUi, IncomingCall};
use crate::bridge::conversation::Conversation;
use crate::bridge::friend::{FriendRequestUi, FriendUi};
use crate::bridge::message::ChatMessage;
use crate::bridge::native::{PendingPeerTrust, PendingServerTrust};
use crate::bridge::types::{ConvRef, SessionSnapshot};
use async_trait::async_trait;
use std::sync::Arc;

/// 状态变更回调（UI 通过它观察桥接层状态）
#[async_trait]
pub trait BridgeListener: Send + Sync {
    /// 登录状态、错误、连接状态变化
    async fn on_session_changed(&self, session: SessionSnapshot);

    /// 会话列表变化（已排序）
    async fn on_conversations_changed(&self, conversations: Vec<Conversation>);

    /// 某个会话的消息列表变化
    async fn on_messages_changed(&self, conv: ConvRef, messages: Vec<ChatMessage>);

    async fn on_friends_changed(&self, friends: Vec<FriendUi>);

    async fn on_friend_requests_changed(&self, requests: Vec<FriendRequestUi>);

    async fn on_call_rooms_changed(&self, rooms: Vec<GroupCallRoomUi>);

    /// 来电出现或消失
    async fn on_incoming_call(&self, call: Option<IncomingCall>);

    /// 需要用户确认服务器或对端指纹
    async fn on_trust_required(
        &self,
        server: Option<PendingServerTrust>,
        peer: Option<PendingPeerTrust>,
    );
}

/// 空实现（默认监听器）
pub struct EmptyBridgeListener;

#[async_trait]
impl BridgeListener for EmptyBridgeListener {
    async fn on_session_changed(&self, _session: SessionSnapshot) {}
    async fn on_conversations_changed(&self, _conversations: Vec<Conversation>) {}
    async fn on_messages_changed(&self, _conv: ConvRef, _messages: Vec<ChatMessage>) {}
    async fn on_friends_changed(&self, _friends: Vec<FriendUi>) {}
    async fn on_friend_requests_changed(&self, _requests: Vec<FriendRequestUi>) {}
    async fn on_call_rooms_changed(&self, _rooms: Vec<GroupCallRoomUi>) {}
    async fn on_incoming_call(&self, _call: Option<IncomingCall>) {}
    async fn on_trust_required(
        &self,
        _server: Option<PendingServerTrust>,
        _peer: Option<PendingPeerTrust>,
    ) {
    }
}

/// 一批待派发的通知
#[derive(Debug, Clone)]
pub enum Notification {
    Session(SessionSnapshot),
    Conversations(Vec<Conversation>),
    Messages(ConvRef, Vec<ChatMessage>),
    Friends(Vec<FriendUi>),
    FriendRequests(Vec<FriendRequestUi>),
    CallRooms(Vec<GroupCallRoomUi>),
    IncomingCall(Option<IncomingCall>),
    Trust(Option<PendingServerTrust>, Option<PendingPeerTrust>),
}

/// 在后台按顺序派发一批通知，不阻塞状态锁
pub fn dispatch(listener: &Arc<dyn BridgeListener>, batch: Vec<Notification>) {
    if batch.is_empty() {
        return;
    }
    let listener = listener.clone();
    tokio::spawn(async move {
        for n in batch {
            match n {
                Notification::Session(s) => listener.on_session_changed(s).await,
                Notification::Conversations(c) => listener.on_conversations_changed(c).await,
                Notification::Messages(conv, m) => listener.on_messages_changed(conv, m).await,
                Notification::Friends(f) => listener.on_friends_changed(f).await,
                Notification::FriendRequests(r) => listener.on_friend_requests_changed(r).await,
                Notification::CallRooms(r) => listener.on_call_rooms_changed(r).await,
                Notification::IncomingCall(c) => listener.on_incoming_call(c).await,
                Notification::Trust(s, p) => listener.on_trust_required(s, p).await,
            }
        }
    });
}
