//! 原生 SDK 边界上的条目类型

use serde::{Deserialize, Serialize};

use crate::bridge::serialization::CALL_ID_LEN;

/// SDK 版本信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub abi: u32,
}

impl std::fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{} (abi {})", self.major, self.minor, self.patch, self.abi)
    }
}

/// 能力位
pub mod capability {
    pub const CHAT: u32 = 1 << 0;
    pub const GROUP: u32 = 1 << 1;
    pub const MEDIA: u32 = 1 << 2;
    pub const GROUP_CALL: u32 = 1 << 3;
    pub const OFFLINE: u32 = 1 << 4;
    pub const DEVICE_SYNC: u32 = 1 << 5;
    pub const KCP: u32 = 1 << 6;
    pub const OPAQUE: u32 = 1 << 7;
}

/// 待确认的服务器指纹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingServerTrust {
    pub fingerprint: String,
    pub pin: String,
}

/// 待确认的对端指纹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPeerTrust {
    pub peer: String,
    pub fingerprint: String,
    pub pin: String,
}

/// 原生层上报的来电
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallEntry {
    pub peer: String,
    pub call_id: [u8; CALL_ID_LEN],
    pub video: bool,
}

/// 每个轮询周期读取一次的会话快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeSession {
    pub token: String,
    pub device_id: String,
    pub remote_mode: bool,
    pub remote_ok: bool,
    pub remote_error: String,
    pub pending_server_trust: Option<PendingServerTrust>,
    pub pending_peer_trust: Option<PendingPeerTrust>,
    pub incoming_call: Option<IncomingCallEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEntry {
    pub username: String,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequestEntry {
    pub requester_username: String,
    pub requester_remark: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub device_id: String,
    pub last_seen_sec: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub group_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMemberEntry {
    pub username: String,
    pub role: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequestEntry {
    pub device_id: String,
    pub request_id_hex: String,
}

/// 通话描述：通话 ID、密钥 ID、媒体位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallDescriptor {
    pub call_id: [u8; CALL_ID_LEN],
    pub key_id: u32,
    pub media_flags: u8,
}

/// 媒体位
pub mod media_flag {
    pub const AUDIO: u8 = 0x01;
    pub const VIDEO: u8 = 0x02;
}

impl CallDescriptor {
    pub fn video(&self) -> bool {
        self.media_flags & media_flag::VIDEO != 0
    }
}

/// 历史消息种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Text,
    File,
    Sticker,
    System,
}

/// 历史消息状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub status: HistoryStatus,
    pub is_group: bool,
    pub outgoing: bool,
    pub timestamp_sec: i64,
    pub conv_id: String,
    pub sender: String,
    pub message_id: String,
    pub text: String,
    pub file_id: String,
    pub file_key: Vec<u8>,
    pub file_name: String,
    pub file_size: u64,
    pub sticker_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    pub audio_delay_ms: u32,
    pub video_delay_ms: u32,
    pub audio_max_frames: u32,
    pub video_max_frames: u32,
    pub pull_max_packets: u32,
    pub pull_wait_ms: u32,
    pub group_pull_max_packets: u32,
    pub group_pull_wait_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub sender: String,
    pub payload: Vec<u8>,
}

/// 回复引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: String,
    pub preview: String,
}

/// 发送载荷（发送与重发共用）
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingPayload {
    Text {
        text: String,
        reply: Option<ReplyRef>,
    },
    File {
        path: String,
    },
    Sticker {
        sticker_id: String,
    },
    Location {
        lat_e7: i32,
        lon_e7: i32,
        label: String,
    },
    Contact {
        username: String,
        display: String,
    },
}

impl OutgoingPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::File { .. } => "file",
            Self::Sticker { .. } => "sticker",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
        }
    }

    /// 群聊只支持文本、文件和位置
    pub fn allowed_in_group(&self) -> bool {
        matches!(
            self,
            Self::Text { .. } | Self::File { .. } | Self::Location { .. }
        )
    }
}

/// 原生事件队列中的扁平事件结构，字段是否有效取决于 `type_id`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub type_id: u32,
    pub ts_ms: u64,
    pub peer: String,
    pub sender: String,
    pub group_id: String,
    pub message_id: String,
    pub text: String,
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_key: Vec<u8>,
    pub sticker_id: String,
    pub notice_kind: u32,
    pub actor: String,
    pub target: String,
    pub role: u32,
    pub typing: bool,
    pub online: bool,
    pub call_id: [u8; CALL_ID_LEN],
    pub call_key_id: u32,
    pub call_op: u32,
    pub call_media_flags: u8,
    pub payload: Vec<u8>,
}
