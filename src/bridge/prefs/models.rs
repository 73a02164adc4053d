//! 本地偏好模型与键名

use crate::bridge::types::{BridgeError, ConvRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// 键名（按会话键分区）
pub mod keys {
    use crate::bridge::types::ConvRef;

    pub const HISTORY_ENABLED: &str = "history_enabled";
    pub const READ_RECEIPTS_ENABLED: &str = "read_receipts_enabled";
    pub const SCREENSHOT_ALERTS_ENABLED: &str = "screenshot_alerts_enabled";
    pub const PRIVACY_LAST_SEEN: &str = "privacy_last_seen";
    pub const PRIVACY_PROFILE_PHOTO: &str = "privacy_profile_photo";
    pub const PRIVACY_GROUP_INVITES: &str = "privacy_group_invites";

    pub fn conv_pinned(c: &ConvRef) -> String {
        format!("conv_pinned_{}", c.storage_key())
    }
    pub fn conv_muted(c: &ConvRef) -> String {
        format!("conv_muted_{}", c.storage_key())
    }
    pub fn conv_unread(c: &ConvRef) -> String {
        format!("conv_unread_{}", c.storage_key())
    }
    pub fn conv_mention(c: &ConvRef) -> String {
        format!("conv_mention_{}", c.storage_key())
    }
    pub fn msg_deleted(c: &ConvRef) -> String {
        format!("msg_deleted_{}", c.storage_key())
    }
    pub fn msg_recalled(c: &ConvRef) -> String {
        format!("msg_recalled_{}", c.storage_key())
    }
    pub fn msg_pinned(c: &ConvRef) -> String {
        format!("msg_pinned_{}", c.storage_key())
    }
    pub fn msg_favorite(c: &ConvRef) -> String {
        format!("msg_favorite_{}", c.storage_key())
    }
    pub fn msg_last_file_path(c: &ConvRef) -> String {
        format!("msg_last_file_path_{}", c.storage_key())
    }
}

/// 隐私可见范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Everyone,
    #[default]
    Contacts,
    Nobody,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::Contacts => "contacts",
            Self::Nobody => "nobody",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "everyone" => Ok(Self::Everyone),
            "contacts" => Ok(Self::Contacts),
            "nobody" => Ok(Self::Nobody),
            other => Err(BridgeError::invalid(format!(
                "Unknown visibility: {}",
                other
            ))),
        }
    }
}

/// 隐私与提醒设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    #[serde(rename = "historyEnabled")]
    pub history_enabled: bool,
    #[serde(rename = "readReceiptsEnabled")]
    pub read_receipts_enabled: bool,
    #[serde(rename = "screenshotAlertsEnabled")]
    pub screenshot_alerts_enabled: bool,
    #[serde(rename = "lastSeen")]
    pub last_seen: Visibility,
    #[serde(rename = "profilePhoto")]
    pub profile_photo: Visibility,
    #[serde(rename = "groupInvites")]
    pub group_invites: Visibility,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            history_enabled: true,
            read_receipts_enabled: true,
            screenshot_alerts_enabled: true,
            last_seen: Visibility::Contacts,
            profile_photo: Visibility::Contacts,
            group_invites: Visibility::Contacts,
        }
    }
}

/// 单个会话的消息级偏好
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePrefs {
    pub deleted: HashSet<String>,
    pub recalled: HashSet<String>,
    pub pinned: Option<String>,
    pub favorites: HashSet<String>,
    pub last_file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_parses_case_insensitively() {
        assert_eq!("Everyone".parse::<Visibility>().unwrap(), Visibility::Everyone);
        assert!(matches!(
            "friends".parse::<Visibility>(),
            Err(BridgeError::InvalidInput(_))
        ));
        assert_eq!(Visibility::default().to_string(), "contacts");
    }

    #[test]
    fn keys_are_scoped_by_conversation() {
        assert_eq!(keys::msg_pinned(&ConvRef::group("g1")), "msg_pinned_g:g1");
        assert_eq!(keys::conv_unread(&ConvRef::peer("bob")), "conv_unread_p:bob");
    }
}
