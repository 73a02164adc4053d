//! 好友相关的 UI 投影

use crate::bridge::native::{FriendEntry, FriendRequestEntry};
use serde::{Deserialize, Serialize};

/// 好友（每次刷新整体替换）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendUi {
    pub username: String,
    pub remark: String,
    /// 在线状态："online" / "offline"，未知时为空
    pub status: String,
}

impl FriendUi {
    pub fn display_name(&self) -> &str {
        if self.remark.trim().is_empty() {
            &self.username
        } else {
            &self.remark
        }
    }
}

impl From<FriendEntry> for FriendUi {
    fn from(e: FriendEntry) -> Self {
        Self {
            username: e.username,
            remark: e.remark,
            status: String::new(),
        }
    }
}

/// 好友申请
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequestUi {
    pub username: String,
    pub remark: String,
}

impl From<FriendRequestEntry> for FriendRequestUi {
    fn from(e: FriendRequestEntry) -> Self {
        Self {
            username: e.requester_username,
            remark: e.requester_remark,
        }
    }
}

pub fn presence_label(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}
