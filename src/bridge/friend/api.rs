//! 好友与好友申请的外观操作
//!
//! 写操作成功后重新拉取列表整体替换，失败时本地列表保持不变。

use crate::bridge::client::{required, ClientBridge};
use crate::bridge::friend::{FriendRequestUi, FriendUi};
use crate::bridge::types::{BridgeError, BridgeResult};
use tracing::info;

impl ClientBridge {
    pub async fn friends(&self) -> Vec<FriendUi> {
        self.inner.state.lock().await.friends.clone()
    }

    pub async fn friend_requests(&self) -> Vec<FriendRequestUi> {
        self.inner.state.lock().await.friend_requests.clone()
    }

    pub async fn blocked_users(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .await
            .blocked
            .iter()
            .cloned()
            .collect()
    }

    /// 拉取好友列表并整体替换
    pub async fn refresh_friends(&self) -> BridgeResult<Vec<FriendUi>> {
        let native = self.ready(true).await?;
        let result = native
            .call("list_friends", |sdk| sdk.list_friends())
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        let result = match result {
            Ok(list) => {
                st.replace_friends(list).await;
                Ok(st.friends.clone())
            }
            Err(e) => Err(e),
        };
        st.note(&result);
        self.flush(st);
        result
    }

    pub async fn refresh_friend_requests(&self) -> BridgeResult<Vec<FriendRequestUi>> {
        let native = self.ready(true).await?;
        let result = native
            .call("list_friend_requests", |sdk| sdk.list_friend_requests())
            .await
            .map_err(BridgeError::from);
        let mut st = self.inner.state.lock().await;
        let result = match result {
            Ok(list) => {
                st.replace_friend_requests(list);
                Ok(st.friend_requests.clone())
            }
            Err(e) => Err(e),
        };
        st.note(&result);
        self.flush(st);
        result
    }

    pub async fn add_friend(&self, username: &str, remark: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let username = required(username, "Username is empty")?;
        let remark = remark.trim().to_string();
        let name = username.clone();
        self.call_simple(true, "add_friend", move |sdk| sdk.add_friend(&name, &remark))
            .await?;
        info!("[Bridge] 🤝 已添加好友 {}", username);
        self.refresh_friends().await.map(|_| ())
    }

    pub async fn set_friend_remark(&self, username: &str, remark: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let username = required(username, "Username is empty")?;
        let remark = remark.trim().to_string();
        self.call_simple(true, "set_friend_remark", move |sdk| {
            sdk.set_friend_remark(&username, &remark)
        })
        .await?;
        self.refresh_friends().await.map(|_| ())
    }

    /// 删除好友；会话与消息保留
    pub async fn delete_friend(&self, username: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let username = required(username, "Username is empty")?;
        let name = username.clone();
        self.call_simple(true, "delete_friend", move |sdk| sdk.delete_friend(&name))
            .await?;
        info!("[Bridge] 👋 已删除好友 {}", username);
        self.refresh_friends().await.map(|_| ())
    }

    pub async fn block_user(&self, username: &str, blocked: bool) -> BridgeResult<()> {
        self.ready(true).await?;
        let username = required(username, "Username is empty")?;
        let name = username.clone();
        self.call_simple(true, "block", move |sdk| sdk.set_user_blocked(&name, blocked))
            .await?;
        let mut st = self.inner.state.lock().await;
        if blocked {
            st.blocked.insert(username);
        } else {
            st.blocked.remove(&username);
        }
        Ok(())
    }

    pub async fn send_friend_request(&self, username: &str, remark: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let username = required(username, "Username is empty")?;
        let remark = remark.trim().to_string();
        self.call_simple(true, "friend_request", move |sdk| {
            sdk.send_friend_request(&username, &remark)
        })
        .await
    }

    /// 处理好友申请；同意后好友列表与申请列表一起刷新
    pub async fn respond_friend_request(&self, username: &str, accept: bool) -> BridgeResult<()> {
        self.ready(true).await?;
        let username = required(username, "Username is empty")?;
        let name = username.clone();
        self.call_simple(true, "respond_friend_request", move |sdk| {
            sdk.respond_friend_request(&name, accept)
        })
        .await?;
        info!(
            "[Bridge] 📨 {} 好友申请: {}",
            if accept { "同意" } else { "拒绝" },
            username
        );
        self.refresh_friend_requests().await?;
        if accept {
            self.refresh_friends().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::client::tests::{bridge_with, logged_in, test_options, wait_until, RecordingListener};
    use crate::bridge::client::ClientBridge;
    use crate::bridge::native::{MockConnector, MockSdk};
    use crate::bridge::types::ConvRef;
    use std::sync::Arc;

    #[tokio::test]
    async fn add_and_delete_refresh_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = logged_in(dir.path()).await;
        bridge.add_friend("dave", "Dave").await.unwrap();
        let names: Vec<String> = bridge.friends().await.into_iter().map(|f| f.username).collect();
        assert_eq!(names, vec!["alice", "bob", "dave"]);
        assert!(bridge
            .conversations()
            .await
            .iter()
            .any(|c| c.key() == ConvRef::peer("dave") && c.name == "Dave"));

        bridge.delete_friend("dave").await.unwrap();
        assert_eq!(bridge.friends().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_remark_leaves_list_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, _control) = logged_in(dir.path()).await;
        bridge.refresh_friends().await.unwrap();
        let before = bridge.friends().await;
        let err = bridge.set_friend_remark("zed", "Z").await.unwrap_err();
        assert_eq!(err, BridgeError::Native("not friends".into()));
        assert_eq!(bridge.friends().await, before);
        assert_eq!(bridge.last_error().await, "not friends");
    }

    #[tokio::test]
    async fn accepting_a_request_adds_a_friend() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let (sdk, _control) = MockSdk::new();
        let bridge = ClientBridge::with_listener(test_options(dir.path()), listener.clone());
        bridge.init(None, &MockConnector::new(sdk)).await.unwrap();
        bridge.login("me", "pw").await.unwrap();

        assert_eq!(bridge.refresh_friend_requests().await.unwrap().len(), 1);
        bridge.respond_friend_request("carol", true).await.unwrap();
        assert!(bridge.friend_requests().await.is_empty());
        assert!(bridge.friends().await.iter().any(|f| f.username == "carol"));
        assert!(wait_until(|| listener.names().contains(&"requests:0".to_string())).await);
    }

    #[tokio::test]
    async fn block_toggles_local_set() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = bridge_with(test_options(dir.path())).await;
        bridge.login("me", "pw").await.unwrap();
        bridge.block_user("mallory", true).await.unwrap();
        assert_eq!(bridge.blocked_users().await, vec!["mallory"]);
        control.fail_next("block", "server busy");
        bridge.block_user("mallory", false).await.unwrap_err();
        assert_eq!(bridge.blocked_users().await, vec!["mallory"]);
        bridge.block_user("mallory", false).await.unwrap();
        assert!(bridge.blocked_users().await.is_empty());
    }
}
