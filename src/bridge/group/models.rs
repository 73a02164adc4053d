//! 群组相关的 UI 投影

use crate::bridge::native::{GroupEntry, GroupMemberEntry};
use serde::{Deserialize, Serialize};

/// 群成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMemberRole {
    Owner,
    Admin,
    Member,
}

impl GroupMemberRole {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Owner),
            1 => Some(Self::Admin),
            2 => Some(Self::Member),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Owner => 0,
            Self::Admin => 1,
            Self::Member => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUi {
    pub id: String,
    pub name: String,
}

impl From<GroupEntry> for GroupUi {
    fn from(e: GroupEntry) -> Self {
        Self {
            id: e.group_id,
            name: e.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMemberUi {
    pub username: String,
    pub role: GroupMemberRole,
}

impl From<GroupMemberEntry> for GroupMemberUi {
    fn from(e: GroupMemberEntry) -> Self {
        Self {
            username: e.username,
            // 未知角色按普通成员展示
            role: GroupMemberRole::from_code(e.role).unwrap_or(GroupMemberRole::Member),
        }
    }
}

/// 收到的入群邀请
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInviteUi {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub sender: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_codes() {
        assert_eq!(GroupMemberRole::from_code(1), Some(GroupMemberRole::Admin));
        assert_eq!(GroupMemberRole::from_code(7), None);
        let m: GroupMemberUi = GroupMemberEntry {
            username: "x".into(),
            role: 9,
        }
        .into();
        assert_eq!(m.role, GroupMemberRole::Member);
    }
}
