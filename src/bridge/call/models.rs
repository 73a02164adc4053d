//! 通话状态模型

use crate::bridge::native::{CallDescriptor, IncomingCallEntry};
use crate::bridge::serialization::{call_id_to_hex, CALL_ID_LEN};
use serde::{Deserialize, Serialize};

/// 群通话房间（每个群最多一个）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCallRoomUi {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "callId")]
    pub call_id: String,
    pub video: bool,
}

/// 待接听的单聊来电
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCall {
    pub peer: String,
    #[serde(skip)]
    pub call_id: [u8; CALL_ID_LEN],
    #[serde(rename = "callIdHex")]
    pub call_id_hex: String,
    pub video: bool,
}

impl From<IncomingCallEntry> for IncomingCall {
    fn from(e: IncomingCallEntry) -> Self {
        Self {
            call_id_hex: call_id_to_hex(&e.call_id),
            peer: e.peer,
            call_id: e.call_id,
            video: e.video,
        }
    }
}

/// 进行中的单聊通话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCallState {
    pub peer: String,
    #[serde(skip)]
    pub call_id: [u8; CALL_ID_LEN],
    #[serde(rename = "callIdHex")]
    pub call_id_hex: String,
    pub video: bool,
    pub initiator: bool,
}

impl PeerCallState {
    pub fn new(peer: &str, desc: &CallDescriptor, initiator: bool) -> Self {
        Self {
            peer: peer.to_string(),
            call_id: desc.call_id,
            call_id_hex: call_id_to_hex(&desc.call_id),
            video: desc.video(),
            initiator,
        }
    }
}

/// 自己所在的群通话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCallState {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(skip)]
    pub call_id: [u8; CALL_ID_LEN],
    #[serde(rename = "callIdHex")]
    pub call_id_hex: String,
    #[serde(rename = "keyId")]
    pub key_id: u32,
    pub video: bool,
    pub owner: bool,
    #[serde(rename = "keyReady")]
    pub key_ready: bool,
}

impl GroupCallState {
    pub fn new(group_id: &str, desc: &CallDescriptor, owner: bool) -> Self {
        Self {
            group_id: group_id.to_string(),
            call_id: desc.call_id,
            call_id_hex: call_id_to_hex(&desc.call_id),
            key_id: desc.key_id,
            video: desc.video(),
            owner,
            key_ready: desc.key_id > 0,
        }
    }
}
