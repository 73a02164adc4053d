//! 通话外观操作：单聊通话、群通话、群通话密钥与信令，以及媒体透传

use crate::bridge::call::{GroupCallRoomUi, GroupCallState, IncomingCall, PeerCallState};
use crate::bridge::client::{required, ClientBridge};
use crate::bridge::event::GroupCallOp;
use crate::bridge::native::{MediaConfig, MediaPacket};
use crate::bridge::serialization::{call_id_from_hex, hex_to_bytes, CALL_ID_LEN};
use crate::bridge::types::{BridgeError, BridgeResult};
use tracing::{debug, info};

pub const NO_INCOMING_CALL: &str = "No incoming call";
pub const NO_ACTIVE_CALL: &str = "No active call";

impl ClientBridge {
    pub async fn call_rooms(&self) -> Vec<GroupCallRoomUi> {
        self.inner.state.lock().await.calls.rooms()
    }

    pub async fn incoming_call(&self) -> Option<IncomingCall> {
        self.inner.state.lock().await.calls.pending_call.clone()
    }

    pub async fn active_peer_call(&self) -> Option<PeerCallState> {
        self.inner.state.lock().await.calls.active_peer_call.clone()
    }

    pub async fn active_group_call(&self) -> Option<GroupCallState> {
        self.inner.state.lock().await.calls.active_group_call.clone()
    }

    // ---------- 单聊通话 ----------

    pub async fn start_peer_call(&self, peer: &str, video: bool) -> BridgeResult<PeerCallState> {
        self.ready(true).await?;
        let peer = required(peer, "Peer is empty")?;
        let p = peer.clone();
        let desc = self
            .call_simple(true, "start_peer_call", move |sdk| sdk.start_peer_call(&p, video))
            .await?;
        let call = PeerCallState::new(&peer, &desc, true);
        info!("[Call] 📞 发起通话 {} ({})", peer, call.call_id_hex);
        self.inner.state.lock().await.calls.active_peer_call = Some(call.clone());
        Ok(call)
    }

    /// 接听当前来电
    pub async fn accept_incoming_call(&self) -> BridgeResult<PeerCallState> {
        self.ready(true).await?;
        let incoming = self
            .incoming_call()
            .await
            .ok_or_else(|| BridgeError::not_found(NO_INCOMING_CALL))?;
        let (peer, call_id) = (incoming.peer.clone(), incoming.call_id);
        let desc = self
            .call_simple(true, "accept_peer_call", move |sdk| {
                sdk.accept_peer_call(&peer, &call_id)
            })
            .await?;
        let call = PeerCallState::new(&incoming.peer, &desc, false);
        info!("[Call] ✅ 接听 {} ({})", incoming.peer, call.call_id_hex);
        let mut st = self.inner.state.lock().await;
        st.calls.pending_call = None;
        st.calls.active_peer_call = Some(call.clone());
        st.mark_incoming_call();
        self.flush(st);
        Ok(call)
    }

    pub async fn decline_incoming_call(&self) -> BridgeResult<()> {
        self.ready(true).await?;
        let incoming = self
            .incoming_call()
            .await
            .ok_or_else(|| BridgeError::not_found(NO_INCOMING_CALL))?;
        let (peer, call_id) = (incoming.peer.clone(), incoming.call_id);
        self.call_simple(true, "decline_peer_call", move |sdk| {
            sdk.decline_peer_call(&peer, &call_id)
        })
        .await?;
        info!("[Call] 🙅 拒接 {}", incoming.peer);
        let mut st = self.inner.state.lock().await;
        st.calls.pending_call = None;
        st.mark_incoming_call();
        self.flush(st);
        Ok(())
    }

    pub async fn end_peer_call(&self) -> BridgeResult<()> {
        self.ready(true).await?;
        let call = self
            .active_peer_call()
            .await
            .ok_or_else(|| BridgeError::not_found(NO_ACTIVE_CALL))?;
        let (peer, call_id) = (call.peer.clone(), call.call_id);
        self.call_simple(true, "end_peer_call", move |sdk| sdk.end_peer_call(&peer, &call_id))
            .await?;
        info!("[Call] 📴 结束通话 {}", call.peer);
        self.inner.state.lock().await.calls.active_peer_call = None;
        Ok(())
    }

    // ---------- 群通话 ----------

    /// 发起群通话；房间列表里替换该群已有的房间
    pub async fn start_group_call(&self, group_id: &str, video: bool) -> BridgeResult<GroupCallState> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let gid = group_id.clone();
        let desc = self
            .call_simple(true, "start_group_call", move |sdk| sdk.start_group_call(&gid, video))
            .await?;
        let call = GroupCallState::new(&group_id, &desc, true);
        info!("[Call] 📞 发起群通话 {} ({})", group_id, call.call_id_hex);
        self.enter_group_call(call.clone()).await;
        Ok(call)
    }

    pub async fn join_group_call(
        &self,
        group_id: &str,
        call_id: &[u8; CALL_ID_LEN],
        video: bool,
    ) -> BridgeResult<GroupCallState> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let (gid, id) = (group_id.clone(), *call_id);
        let desc = self
            .call_simple(true, "join_group_call", move |sdk| {
                sdk.join_group_call(&gid, &id, video)
            })
            .await?;
        let call = GroupCallState::new(&group_id, &desc, false);
        info!("[Call] 🎧 加入群通话 {} ({})", group_id, call.call_id_hex);
        self.enter_group_call(call.clone()).await;
        Ok(call)
    }

    /// 十六进制通话 ID 在本地校验，非法时不触达原生层
    pub async fn join_group_call_hex(
        &self,
        group_id: &str,
        call_id_hex: &str,
        video: bool,
    ) -> BridgeResult<GroupCallState> {
        self.ready(true).await?;
        let call_id = call_id_from_hex(call_id_hex)?;
        self.join_group_call(group_id, &call_id, video).await
    }

    pub async fn leave_group_call(
        &self,
        group_id: &str,
        call_id: &[u8; CALL_ID_LEN],
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let (gid, id) = (group_id.clone(), *call_id);
        self.call_simple(true, "leave_group_call", move |sdk| sdk.leave_group_call(&gid, &id))
            .await?;
        info!("[Call] 👋 离开群通话 {}", group_id);
        let mut st = self.inner.state.lock().await;
        if st.calls.remove_room(&group_id) {
            st.mark_call_rooms();
        }
        self.flush(st);
        Ok(())
    }

    pub async fn leave_group_call_hex(&self, group_id: &str, call_id_hex: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let call_id = call_id_from_hex(call_id_hex)?;
        self.leave_group_call(group_id, &call_id).await
    }

    async fn enter_group_call(&self, call: GroupCallState) {
        let mut st = self.inner.state.lock().await;
        if st.calls.upsert_room(&call.group_id, &call.call_id, call.video) {
            st.mark_call_rooms();
        }
        st.calls.active_group_call = Some(call);
        self.flush(st);
    }

    // ---------- 群通话密钥与信令 ----------

    pub async fn get_group_call_key(
        &self,
        group_id: &str,
        call_id_hex: &str,
        key_id: u32,
    ) -> BridgeResult<Vec<u8>> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let call_id = call_id_from_hex(call_id_hex)?;
        let gid = group_id.clone();
        let key = self
            .call_simple(true, "group_call_key", move |sdk| {
                sdk.get_group_call_key(&gid, &call_id, key_id)
            })
            .await?;
        let mut st = self.inner.state.lock().await;
        if let Some(call) = st
            .calls
            .active_group_call
            .as_mut()
            .filter(|c| c.group_id == group_id && c.call_id == call_id)
        {
            call.key_id = key_id;
            call.key_ready = !key.is_empty();
        }
        Ok(key)
    }

    pub async fn rotate_group_call_key(
        &self,
        group_id: &str,
        call_id_hex: &str,
        key_id: u32,
        members: &[String],
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let call_id = call_id_from_hex(call_id_hex)?;
        let members = members.to_vec();
        debug!("[Call] 🔑 轮换群通话密钥 {} key_id={}", group_id, key_id);
        self.call_simple(true, "rotate_group_call_key", move |sdk| {
            sdk.rotate_group_call_key(&group_id, &call_id, key_id, &members)
        })
        .await
    }

    pub async fn request_group_call_key(
        &self,
        group_id: &str,
        call_id_hex: &str,
        key_id: u32,
        members: &[String],
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let call_id = call_id_from_hex(call_id_hex)?;
        let members = members.to_vec();
        self.call_simple(true, "request_group_call_key", move |sdk| {
            sdk.request_group_call_key(&group_id, &call_id, key_id, &members)
        })
        .await
    }

    pub async fn send_group_call_signal(
        &self,
        group_id: &str,
        call_id_hex: &str,
        op: GroupCallOp,
        media_flags: u8,
        key_id: u32,
        members: &[String],
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let call_id = call_id_from_hex(call_id_hex)?;
        let members = members.to_vec();
        self.call_simple(true, "group_call_signal", move |sdk| {
            sdk.send_group_call_signal(&group_id, &call_id, op.code(), media_flags, key_id, &members)
        })
        .await
    }

    // ---------- 媒体透传 ----------

    pub async fn get_media_config(&self) -> BridgeResult<MediaConfig> {
        self.call_simple(false, "media_config", |sdk| sdk.get_media_config())
            .await
    }

    pub async fn derive_media_root(&self, peer: &str, call_id_hex: &str) -> BridgeResult<Vec<u8>> {
        self.ready(true).await?;
        let peer = required(peer, "Peer is empty")?;
        let call_id = hex_to_bytes(call_id_hex)?;
        self.call_simple(true, "derive_media_root", move |sdk| {
            sdk.derive_media_root(&peer, &call_id)
        })
        .await
    }

    pub async fn push_media(&self, peer: &str, call_id_hex: &str, packet: Vec<u8>) -> BridgeResult<()> {
        self.ready(true).await?;
        let peer = required(peer, "Peer is empty")?;
        let call_id = hex_to_bytes(call_id_hex)?;
        self.call_simple(true, "push_media", move |sdk| sdk.push_media(&peer, &call_id, &packet))
            .await
    }

    pub async fn pull_media(
        &self,
        call_id_hex: &str,
        max_packets: u32,
        wait_ms: u32,
    ) -> BridgeResult<Vec<MediaPacket>> {
        self.ready(true).await?;
        let call_id = hex_to_bytes(call_id_hex)?;
        self.call_simple(true, "pull_media", move |sdk| {
            sdk.pull_media(&call_id, max_packets, wait_ms)
        })
        .await
    }

    pub async fn push_group_media(
        &self,
        group_id: &str,
        call_id_hex: &str,
        packet: Vec<u8>,
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let call_id = hex_to_bytes(call_id_hex)?;
        self.call_simple(true, "push_group_media", move |sdk| {
            sdk.push_group_media(&group_id, &call_id, &packet)
        })
        .await
    }

    pub async fn pull_group_media(
        &self,
        call_id_hex: &str,
        max_packets: u32,
        wait_ms: u32,
    ) -> BridgeResult<Vec<MediaPacket>> {
        self.ready(true).await?;
        let call_id = hex_to_bytes(call_id_hex)?;
        self.call_simple(true, "pull_group_media", move |sdk| {
            sdk.pull_group_media(&call_id, max_packets, wait_ms)
        })
        .await
    }

    pub async fn add_media_subscription(
        &self,
        call_id_hex: &str,
        is_group: bool,
        group_id: Option<&str>,
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let call_id = hex_to_bytes(call_id_hex)?;
        let group_id = match group_id {
            Some(g) => Some(required(g, "Group id is empty")?),
            None if is_group => return Err(BridgeError::invalid("Group id is empty")),
            None => None,
        };
        self.call_simple(true, "add_media_subscription", move |sdk| {
            sdk.add_media_subscription(&call_id, is_group, group_id.as_deref())
        })
        .await
    }

    pub async fn clear_media_subscriptions(&self) -> BridgeResult<()> {
        self.call_simple(false, "clear_media_subscriptions", |sdk| {
            sdk.clear_media_subscriptions();
            Ok(())
        })
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
    use crate::bridge::native::{IncomingCallEntry, MockConnector, MockSdk, RawEvent};
    use crate::bridge::serialization::call_id_to_hex;
    use std::sync::Arc;

    #[tokio::test]
    async fn group_room_created_then_removed_by_leave_event() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let (sdk, control) = MockSdk::new();
        let bridge = ClientBridge::with_listener(test_options(dir.path()), listener.clone());
        bridge.init(None, &MockConnector::new(sdk)).await.unwrap();
        bridge.login("me", "pw").await.unwrap();

        let call = bridge.start_group_call("g1", true).await.unwrap();
        let rooms = bridge.call_rooms().await;
        assert_eq!(rooms.len(), 1);
        assert!(rooms[0].video);
        assert_eq!(rooms[0].call_id, call.call_id_hex);

        control.push_event(RawEvent {
            type_id: event_type::GROUP_CALL,
            group_id: "g1".into(),
            sender: "bob".into(),
            call_id: call.call_id,
            call_op: GroupCallOp::Leave.code(),
            ..Default::default()
        });
        bridge.poll_once().await;
        assert!(bridge.call_rooms().await.is_empty());
        assert!(bridge.active_group_call().await.is_none());
        assert!(wait_until(|| listener.names().contains(&"rooms:0".to_string())).await);
    }

    #[tokio::test]
    async fn rejoin_replaces_room() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = logged_in(dir.path()).await;
        bridge.start_group_call("g1", false).await.unwrap();
        let hex = call_id_to_hex(&[7; CALL_ID_LEN]);
        bridge.join_group_call_hex("g1", &hex, false).await.unwrap();
        let rooms = bridge.call_rooms().await;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].call_id, hex);

        bridge.leave_group_call_hex("g1", &hex).await.unwrap();
        assert!(bridge.call_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn bad_hex_never_reaches_native() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        control.clear_calls();
        for bad in ["", "xyz", "0011"] {
            let err = bridge.join_group_call_hex("g1", bad, false).await.unwrap_err();
            assert!(matches!(err, BridgeError::InvalidInput(_)));
        }
        assert!(control.calls().is_empty());
        assert!(bridge.last_error().await.is_empty());
    }

    #[tokio::test]
    async fn incoming_call_accept_and_end() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        let err = bridge.accept_incoming_call().await.unwrap_err();
        assert_eq!(err, BridgeError::not_found(NO_INCOMING_CALL));

        control.set_incoming_call(Some(IncomingCallEntry {
            peer: "alice".into(),
            call_id: [3; CALL_ID_LEN],
            video: true,
        }));
        bridge.poll_once().await;
        assert_eq!(bridge.incoming_call().await.unwrap().peer, "alice");

        let call = bridge.accept_incoming_call().await.unwrap();
        assert!(call.video);
        assert!(!call.initiator);
        assert!(bridge.incoming_call().await.is_none());
        bridge.end_peer_call().await.unwrap();
        assert!(bridge.active_peer_call().await.is_none());
    }

    #[tokio::test]
    async fn group_key_marks_call_ready() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = logged_in(dir.path()).await;
        let call = bridge.start_group_call("g1", false).await.unwrap();
        let key = bridge
            .get_group_call_key("g1", &call.call_id_hex, 2)
            .await
            .unwrap();
        assert_eq!(key.len(), 32);
        let active = bridge.active_group_call().await.unwrap();
        assert_eq!(active.key_id, 2);
        assert!(active.key_ready);

        let err = bridge
            .send_group_call_signal("g1", &call.call_id_hex, GroupCallOp::Ping, 1, 2, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Native(_)));
        assert!(!bridge.last_error().await.is_empty());
    }

    #[tokio::test]
    async fn media_config_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = logged_in(dir.path()).await;
        let cfg = bridge.get_media_config().await.unwrap();
        assert_eq!(cfg.group_pull_max_packets, 64);
        let err = bridge
            .add_media_subscription("00ff", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn readiness_is_checked_before_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = bridge_with(test_options(dir.path())).await;
        control.clear_calls();
        let err = bridge.start_peer_call("", false).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
        let err = bridge.join_group_call_hex("g1", "zz", false).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
        let err = bridge.push_media(" ", "zz", vec![1]).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
        assert!(control.calls().is_empty());

        bridge.login("me", "pw").await.unwrap();
        let err = bridge.start_peer_call("", false).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }
}
