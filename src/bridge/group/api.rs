//! 群组的外观操作：加入、退出、创建、邀请与成员管理

use crate::bridge::client::{required, ClientBridge};
use crate::bridge::group::{GroupInviteUi, GroupMemberRole, GroupMemberUi, GroupUi};
use crate::bridge::types::{BridgeError, BridgeResult, ConvRef};
use tracing::info;

impl ClientBridge {
    pub async fn groups(&self) -> Vec<GroupUi> {
        self.inner.state.lock().await.groups.clone()
    }

    pub async fn group_members(&self, group_id: &str) -> Vec<GroupMemberUi> {
        self.inner
            .state
            .lock()
            .await
            .group_members
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn group_invites(&self) -> Vec<GroupInviteUi> {
        self.inner.state.lock().await.group_invites.clone()
    }

    /// 拉取群列表并整体替换
    pub async fn refresh_groups(&self) -> BridgeResult<Vec<GroupUi>> {
        let native = self.ready(true).await?;
        let result = native
            .call("list_groups", |sdk| sdk.list_groups())
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        let result = match result {
            Ok(list) => {
                st.replace_groups(list).await;
                Ok(st.groups.clone())
            }
            Err(e) => Err(e),
        };
        st.note(&result);
        self.flush(st);
        result
    }

    /// 加入群；成功后移除对应的邀请
    pub async fn join_group(&self, group_id: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let gid = group_id.clone();
        self.call_simple(true, "join_group", move |sdk| sdk.join_group(&gid))
            .await?;
        info!("[Bridge] 👥 已加入群 {}", group_id);
        {
            let mut st = self.inner.state.lock().await;
            st.group_invites.retain(|i| i.group_id != group_id);
        }
        self.refresh_groups().await.map(|_| ())
    }

    /// 退出群；群、成员、房间与会话一并移除
    pub async fn leave_group(&self, group_id: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let gid = group_id.clone();
        self.call_simple(true, "leave_group", move |sdk| sdk.leave_group(&gid))
            .await?;
        info!("[Bridge] 🚪 已退出群 {}", group_id);
        let conv = ConvRef::group(&group_id);
        let mut st = self.inner.state.lock().await;
        st.groups.retain(|g| g.id != group_id);
        st.group_members.remove(&group_id);
        st.group_invites.retain(|i| i.group_id != group_id);
        if st.calls.remove_room(&group_id) {
            st.mark_call_rooms();
        }
        st.messages.remove(&conv);
        if st.conversations.remove(&conv) {
            st.mark_conversations();
        }
        self.flush(st);
        Ok(())
    }

    /// 创建群，返回群 ID
    pub async fn create_group(&self) -> BridgeResult<String> {
        let id = self
            .call_simple(true, "create_group", |sdk| sdk.create_group())
            .await?;
        info!("[Bridge] 🆕 已创建群 {}", id);
        self.refresh_groups().await?;
        Ok(id)
    }

    /// 发送入群邀请，返回邀请消息 ID
    pub async fn send_group_invite(&self, group_id: &str, peer: &str) -> BridgeResult<String> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let peer = required(peer, "Peer is empty")?;
        self.call_simple(true, "group_invite", move |sdk| {
            sdk.send_group_invite(&group_id, &peer)
        })
        .await
    }

    pub async fn refresh_group_members(&self, group_id: &str) -> BridgeResult<Vec<GroupMemberUi>> {
        let native = self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let gid = group_id.clone();
        let result = native
            .call("list_group_members", move |sdk| sdk.list_group_members(&gid))
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        let result = result.map(|list| {
            let members: Vec<GroupMemberUi> = list.into_iter().map(Into::into).collect();
            st.group_members.insert(group_id, members.clone());
            members
        });
        st.note(&result);
        self.flush(st);
        result
    }

    pub async fn set_group_member_role(
        &self,
        group_id: &str,
        peer: &str,
        role: GroupMemberRole,
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let peer = required(peer, "Peer is empty")?;
        let gid = group_id.clone();
        self.call_simple(true, "set_member_role", move |sdk| {
            sdk.set_group_member_role(&gid, &peer, role.code())
        })
        .await?;
        self.refresh_group_members(&group_id).await.map(|_| ())
    }

    pub async fn kick_group_member(&self, group_id: &str, peer: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let group_id = required(group_id, "Group id is empty")?;
        let peer = required(peer, "Peer is empty")?;
        let gid = group_id.clone();
        self.call_simple(true, "kick_member", move |sdk| {
            sdk.kick_group_member(&gid, &peer)
        })
        .await?;
        self.refresh_group_members(&group_id).await.map(|_| ())
    }
}
