//! 会话本地模型定义

use crate::bridge::serialization::{initials, time_label};
use crate::bridge::types::ConvRef;
use serde::{Deserialize, Serialize};

/// 会话列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    pub name: String,
    pub initials: String,
    #[serde(rename = "lastMessage")]
    pub last_message: String,
    pub time: String,
    /// 最近活动时间（毫秒），用于排序
    #[serde(rename = "lastActivityMs")]
    pub last_activity_ms: i64,
    #[serde(rename = "unreadCount")]
    pub unread_count: u32,
    #[serde(rename = "mentionCount")]
    pub mention_count: u32,
    #[serde(rename = "isPinned")]
    pub is_pinned: bool,
    #[serde(rename = "isMuted")]
    pub is_muted: bool,
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
    pub draft: Option<String>,
}

impl Conversation {
    pub fn new(conv: &ConvRef, name: &str) -> Self {
        let name = if name.trim().is_empty() {
            conv.id.clone()
        } else {
            name.to_string()
        };
        Self {
            id: conv.id.clone(),
            is_group: conv.is_group,
            initials: initials(&name),
            name,
            last_message: String::new(),
            time: String::new(),
            last_activity_ms: 0,
            unread_count: 0,
            mention_count: 0,
            is_pinned: false,
            is_muted: false,
            is_typing: false,
            draft: None,
        }
    }

    pub fn key(&self) -> ConvRef {
        ConvRef {
            id: self.id.clone(),
            is_group: self.is_group,
        }
    }

    pub fn rename(&mut self, name: &str) {
        if !name.trim().is_empty() && self.name != name {
            self.name = name.to_string();
            self.initials = initials(name);
        }
    }

    pub fn touch(&mut self, preview: String, ts_ms: i64) {
        if ts_ms >= self.last_activity_ms {
            self.last_message = preview;
            self.last_activity_ms = ts_ms;
            self.time = time_label(ts_ms);
        }
    }
}

/// 会话持久化偏好（置顶、免打扰、未读、@ 计数）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationPrefs {
    pub pinned: bool,
    pub muted: bool,
    pub unread: u32,
    pub mention: u32,
}
