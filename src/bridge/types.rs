use serde::{Deserialize, Serialize};
use std::fmt;

/// 召回控制消息前缀，后接被召回的消息 ID
pub const RECALL_MARKER: &str = "[recall]:";

/// 桥接层对外错误
///
/// 原生调用失败会写入共享的 `last_error`；输入校验失败只返回给调用方。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// 没有可用的原生句柄或尚未登录
    #[error("{0}")]
    NotReady(String),
    /// 本地输入不合法（空字段、非法十六进制、无法解析的数字等）
    #[error("{0}")]
    InvalidInput(String),
    /// 目标不存在（消息、会话、待重发条目）
    #[error("{0}")]
    NotFound(String),
    /// 原生 SDK 返回的错误字符串
    #[error("{0}")]
    Native(String),
}

impl BridgeError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// 是否应写入共享的 `last_error`
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Native(_) | Self::NotReady(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// 会话键：单聊使用对端用户名，群聊使用群 ID，两者命名空间互不重叠
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConvRef {
    pub id: String,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
}

impl ConvRef {
    pub fn peer(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_group: false,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_group: true,
        }
    }

    /// 偏好存储中使用的键片段
    pub fn storage_key(&self) -> String {
        if self.is_group {
            format!("g:{}", self.id)
        } else {
            format!("p:{}", self.id)
        }
    }
}

impl fmt::Display for ConvRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// 会话状态快照（供 UI 与监听器使用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub initialized: bool,
    #[serde(rename = "loggedIn")]
    pub logged_in: bool,
    pub username: String,
    pub token: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "lastError")]
    pub last_error: String,
    #[serde(rename = "statusMessage")]
    pub status_message: String,
    #[serde(rename = "remoteOk")]
    pub remote_ok: bool,
    #[serde(rename = "remoteError")]
    pub remote_error: String,
    #[serde(rename = "isMock")]
    pub is_mock: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_do_not_collide() {
        assert_ne!(
            ConvRef::peer("alice").storage_key(),
            ConvRef::group("alice").storage_key()
        );
    }

    #[test]
    fn only_native_and_not_ready_are_shared() {
        assert!(BridgeError::Native("x".into()).is_shared());
        assert!(BridgeError::not_ready("x").is_shared());
        assert!(!BridgeError::invalid("x").is_shared());
        assert!(!BridgeError::not_found("x").is_shared());
    }
}
