//! 原生事件解码
//!
//! 原生队列给出的是扁平的 `RawEvent`，这里一次性解码成按种类区分的 `SdkEvent`，
//! 每个变体只携带自己需要的字段。

use crate::bridge::native::RawEvent;
use crate::bridge::serialization::CALL_ID_LEN;
use crate::bridge::types::RECALL_MARKER;

/// 原生事件类型编号
pub mod event_type {
    pub const NONE: u32 = 0;
    pub const CHAT_TEXT: u32 = 1;
    pub const CHAT_FILE: u32 = 2;
    pub const CHAT_STICKER: u32 = 3;
    pub const GROUP_TEXT: u32 = 4;
    pub const GROUP_FILE: u32 = 5;
    pub const GROUP_INVITE: u32 = 6;
    pub const GROUP_NOTICE: u32 = 7;
    pub const OUTGOING_TEXT: u32 = 8;
    pub const OUTGOING_FILE: u32 = 9;
    pub const OUTGOING_STICKER: u32 = 10;
    pub const OUTGOING_GROUP_TEXT: u32 = 11;
    pub const OUTGOING_GROUP_FILE: u32 = 12;
    pub const DELIVERY: u32 = 13;
    pub const READ_RECEIPT: u32 = 14;
    pub const TYPING: u32 = 15;
    pub const PRESENCE: u32 = 16;
    pub const GROUP_CALL: u32 = 17;
    pub const MEDIA_RELAY: u32 = 18;
    pub const GROUP_MEDIA_RELAY: u32 = 19;
    pub const OFFLINE_PAYLOAD: u32 = 20;
}

/// 文件消息引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_key: Vec<u8>,
}

/// 群通知种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupNoticeKind {
    Join,
    Leave,
    Kick,
    RoleSet,
    Other(u32),
}

impl From<u32> for GroupNoticeKind {
    fn from(v: u32) -> Self {
        match v {
            1 => Self::Join,
            2 => Self::Leave,
            3 => Self::Kick,
            4 => Self::RoleSet,
            other => Self::Other(other),
        }
    }
}

/// 群通话信令操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCallOp {
    Create,
    Join,
    Leave,
    End,
    Update,
    Ping,
}

impl GroupCallOp {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Create),
            2 => Some(Self::Join),
            3 => Some(Self::Leave),
            4 => Some(Self::End),
            5 => Some(Self::Update),
            6 => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Create => 1,
            Self::Join => 2,
            Self::Leave => 3,
            Self::End => 4,
            Self::Update => 5,
            Self::Ping => 6,
        }
    }
}

/// 群通话信令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCallSignal {
    pub group_id: String,
    pub sender: String,
    pub call_id: [u8; CALL_ID_LEN],
    pub key_id: u32,
    pub op: GroupCallOp,
    pub media_flags: u8,
}

/// 中继载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPayload {
    pub peer: String,
    pub sender: String,
    pub group_id: String,
    pub payload: Vec<u8>,
}

/// SDK 事件（闭合的标签联合）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    ChatText {
        peer: String,
        message_id: String,
        text: String,
        ts_ms: u64,
    },
    ChatFile {
        peer: String,
        message_id: String,
        file: FileRef,
        ts_ms: u64,
    },
    ChatSticker {
        peer: String,
        message_id: String,
        sticker_id: String,
        ts_ms: u64,
    },
    GroupText {
        group_id: String,
        sender: String,
        message_id: String,
        text: String,
        ts_ms: u64,
    },
    GroupFile {
        group_id: String,
        sender: String,
        message_id: String,
        file: FileRef,
        ts_ms: u64,
    },
    GroupInvite {
        group_id: String,
        sender: String,
        message_id: String,
        ts_ms: u64,
    },
    GroupNotice {
        group_id: String,
        kind: GroupNoticeKind,
        actor: String,
        target: String,
        role: u32,
        ts_ms: u64,
    },
    OutgoingText {
        peer: String,
        message_id: String,
        text: String,
        ts_ms: u64,
    },
    OutgoingFile {
        peer: String,
        message_id: String,
        file: FileRef,
        ts_ms: u64,
    },
    OutgoingSticker {
        peer: String,
        message_id: String,
        sticker_id: String,
        ts_ms: u64,
    },
    OutgoingGroupText {
        group_id: String,
        message_id: String,
        text: String,
        ts_ms: u64,
    },
    OutgoingGroupFile {
        group_id: String,
        message_id: String,
        file: FileRef,
        ts_ms: u64,
    },
    Delivery {
        peer: String,
        message_id: String,
    },
    ReadReceipt {
        peer: String,
        message_id: String,
    },
    Typing {
        peer: String,
        typing: bool,
    },
    Presence {
        peer: String,
        online: bool,
    },
    GroupCall(GroupCallSignal),
    MediaRelay(RelayPayload),
    GroupMediaRelay(RelayPayload),
    OfflinePayload(RelayPayload),
}

/// 解码失败原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty event")]
    Empty,
    #[error("unknown event type {0}")]
    UnknownType(u32),
    #[error("unknown group call op {0}")]
    UnknownCallOp(u32),
}

fn file_ref(raw: &mut RawEvent) -> FileRef {
    FileRef {
        file_id: std::mem::take(&mut raw.file_id),
        file_name: std::mem::take(&mut raw.file_name),
        file_size: raw.file_size,
        file_key: std::mem::take(&mut raw.file_key),
    }
}

fn relay(raw: &mut RawEvent) -> RelayPayload {
    RelayPayload {
        peer: std::mem::take(&mut raw.peer),
        sender: std::mem::take(&mut raw.sender),
        group_id: std::mem::take(&mut raw.group_id),
        payload: std::mem::take(&mut raw.payload),
    }
}

impl TryFrom<RawEvent> for SdkEvent {
    type Error = DecodeError;

    fn try_from(mut raw: RawEvent) -> Result<Self, Self::Error> {
        use event_type::*;
        let ts_ms = raw.ts_ms;
        let take = |s: &mut String| std::mem::take(s);
        let event = match raw.type_id {
            NONE => return Err(DecodeError::Empty),
            CHAT_TEXT => SdkEvent::ChatText {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
                text: take(&mut raw.text),
                ts_ms,
            },
            CHAT_FILE => SdkEvent::ChatFile {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
                file: file_ref(&mut raw),
                ts_ms,
            },
            CHAT_STICKER => SdkEvent::ChatSticker {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
                sticker_id: take(&mut raw.sticker_id),
                ts_ms,
            },
            GROUP_TEXT => SdkEvent::GroupText {
                group_id: take(&mut raw.group_id),
                sender: take(&mut raw.sender),
                message_id: take(&mut raw.message_id),
                text: take(&mut raw.text),
                ts_ms,
            },
            GROUP_FILE => SdkEvent::GroupFile {
                group_id: take(&mut raw.group_id),
                sender: take(&mut raw.sender),
                message_id: take(&mut raw.message_id),
                file: file_ref(&mut raw),
                ts_ms,
            },
            GROUP_INVITE => SdkEvent::GroupInvite {
                group_id: take(&mut raw.group_id),
                sender: take(&mut raw.sender),
                message_id: take(&mut raw.message_id),
                ts_ms,
            },
            GROUP_NOTICE => SdkEvent::GroupNotice {
                group_id: take(&mut raw.group_id),
                kind: raw.notice_kind.into(),
                actor: take(&mut raw.actor),
                target: take(&mut raw.target),
                role: raw.role,
                ts_ms,
            },
            OUTGOING_TEXT => SdkEvent::OutgoingText {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
                text: take(&mut raw.text),
                ts_ms,
            },
            OUTGOING_FILE => SdkEvent::OutgoingFile {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
                file: file_ref(&mut raw),
                ts_ms,
            },
            OUTGOING_STICKER => SdkEvent::OutgoingSticker {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
                sticker_id: take(&mut raw.sticker_id),
                ts_ms,
            },
            OUTGOING_GROUP_TEXT => SdkEvent::OutgoingGroupText {
                group_id: take(&mut raw.group_id),
                message_id: take(&mut raw.message_id),
                text: take(&mut raw.text),
                ts_ms,
            },
            OUTGOING_GROUP_FILE => SdkEvent::OutgoingGroupFile {
                group_id: take(&mut raw.group_id),
                message_id: take(&mut raw.message_id),
                file: file_ref(&mut raw),
                ts_ms,
            },
            DELIVERY => SdkEvent::Delivery {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
            },
            READ_RECEIPT => SdkEvent::ReadReceipt {
                peer: take(&mut raw.peer),
                message_id: take(&mut raw.message_id),
            },
            TYPING => SdkEvent::Typing {
                peer: take(&mut raw.peer),
                typing: raw.typing,
            },
            PRESENCE => SdkEvent::Presence {
                peer: take(&mut raw.peer),
                online: raw.online,
            },
            GROUP_CALL => {
                let op = GroupCallOp::from_code(raw.call_op)
                    .ok_or(DecodeError::UnknownCallOp(raw.call_op))?;
                SdkEvent::GroupCall(GroupCallSignal {
                    group_id: take(&mut raw.group_id),
                    sender: take(&mut raw.sender),
                    call_id: raw.call_id,
                    key_id: raw.call_key_id,
                    op,
                    media_flags: raw.call_media_flags,
                })
            }
            MEDIA_RELAY => SdkEvent::MediaRelay(relay(&mut raw)),
            GROUP_MEDIA_RELAY => SdkEvent::GroupMediaRelay(relay(&mut raw)),
            OFFLINE_PAYLOAD => SdkEvent::OfflinePayload(relay(&mut raw)),
            other => return Err(DecodeError::UnknownType(other)),
        };
        Ok(event)
    }
}

/// 构造召回控制消息
pub fn recall_payload(message_id: &str) -> String {
    format!("{}{}", RECALL_MARKER, message_id)
}

/// 若文本是召回控制消息，返回被召回的消息 ID
///
/// 前缀没有转义，普通文本恰好以同一前缀开头时同样会被当作召回。
pub fn parse_recall(text: &str) -> Option<&str> {
    text.strip_prefix(RECALL_MARKER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_with_only_its_fields() {
        let raw = RawEvent {
            type_id: event_type::CHAT_TEXT,
            ts_ms: 42,
            peer: "alice".into(),
            message_id: "m1".into(),
            text: "hello".into(),
            sticker_id: "ignored".into(),
            ..Default::default()
        };
        assert_eq!(
            SdkEvent::try_from(raw).unwrap(),
            SdkEvent::ChatText {
                peer: "alice".into(),
                message_id: "m1".into(),
                text: "hello".into(),
                ts_ms: 42,
            }
        );
    }

    #[test]
    fn decodes_group_call_signal() {
        let raw = RawEvent {
            type_id: event_type::GROUP_CALL,
            group_id: "g1".into(),
            sender: "bob".into(),
            call_id: [7u8; CALL_ID_LEN],
            call_key_id: 3,
            call_op: 3,
            call_media_flags: 0x03,
            ..Default::default()
        };
        match SdkEvent::try_from(raw).unwrap() {
            SdkEvent::GroupCall(sig) => {
                assert_eq!(sig.op, GroupCallOp::Leave);
                assert_eq!(sig.group_id, "g1");
                assert_eq!(sig.key_id, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_none_unknown_and_bad_call_op() {
        assert_eq!(
            SdkEvent::try_from(RawEvent::default()).unwrap_err(),
            DecodeError::Empty
        );
        let unknown = RawEvent {
            type_id: 99,
            ..Default::default()
        };
        assert_eq!(
            SdkEvent::try_from(unknown).unwrap_err(),
            DecodeError::UnknownType(99)
        );
        let bad_op = RawEvent {
            type_id: event_type::GROUP_CALL,
            call_op: 42,
            ..Default::default()
        };
        assert_eq!(
            SdkEvent::try_from(bad_op).unwrap_err(),
            DecodeError::UnknownCallOp(42)
        );
    }

    #[test]
    fn recall_marker_round_trip() {
        assert_eq!(recall_payload("m2"), "[recall]:m2");
        assert_eq!(parse_recall("[recall]:m2"), Some("m2"));
        assert_eq!(parse_recall("[recall]:"), None);
        assert_eq!(parse_recall("hello"), None);
    }

    #[test]
    fn notice_kinds_map_from_codes() {
        assert_eq!(GroupNoticeKind::from(3), GroupNoticeKind::Kick);
        assert_eq!(GroupNoticeKind::from(9), GroupNoticeKind::Other(9));
    }
}
