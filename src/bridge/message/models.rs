//! 消息本地模型

use crate::bridge::native::{HistoryEntry, HistoryKind, HistoryStatus, OutgoingPayload};
use crate::bridge::serialization::human_size;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// 投递状态
///
/// Sending < Sent < Delivered < Read 单调推进；Failed 只能被一次成功的重发（Sent）替换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed => 0,
        }
    }

    /// 合并新状态，返回合并后的值；不会把较新的状态覆盖回较旧的状态
    pub fn merge(self, incoming: MessageStatus) -> MessageStatus {
        match (self, incoming) {
            (Self::Failed, Self::Failed) => Self::Failed,
            (Self::Failed, Self::Sending) => Self::Failed,
            (Self::Failed, other) => other,
            (current, Self::Failed) => {
                if current == Self::Sending {
                    Self::Failed
                } else {
                    current
                }
            }
            (current, other) => {
                if other.rank() > current.rank() {
                    other
                } else {
                    current
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentKind {
    File,
    Voice,
    Photo,
    Location,
    Sticker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Ready,
    Downloading,
    Failed,
}

/// 附件引用（不持有解密后的内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub label: String,
    pub meta: String,
    pub state: TransferState,
    pub progress: f32,
    #[serde(rename = "fileId")]
    pub file_id: Option<String>,
    #[serde(rename = "fileKeyHex")]
    pub file_key_hex: Option<String>,
    #[serde(rename = "fileSize")]
    pub file_size: Option<u64>,
}

impl Attachment {
    pub fn simple(kind: AttachmentKind, label: impl Into<String>, meta: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            meta: meta.into(),
            state: TransferState::Ready,
            progress: 0.0,
            file_id: None,
            file_key_hex: None,
            file_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub sender: String,
    pub snippet: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReaction {
    pub label: String,
    pub count: u32,
}

/// 会话中的一条消息（单聊与群聊共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub time: String,
    #[serde(rename = "tsMs")]
    pub ts_ms: i64,
    #[serde(rename = "isMine")]
    pub is_mine: bool,
    pub status: MessageStatus,
    #[serde(rename = "isEdited")]
    pub is_edited: bool,
    #[serde(rename = "isRevoked")]
    pub is_revoked: bool,
    /// 自己召回的原文，仅用于重新编辑
    #[serde(skip)]
    pub recalled_text: Option<String>,
    /// 召回截止时刻（单调时钟）
    #[serde(skip)]
    pub recall_deadline: Option<Instant>,
    #[serde(rename = "forwardedFrom")]
    pub forwarded_from: Option<String>,
    #[serde(rename = "replyTo")]
    pub reply_to: Option<ReplyPreview>,
    pub attachment: Option<Attachment>,
    pub reactions: Vec<MessageReaction>,
}

pub type GroupMessage = ChatMessage;

impl ChatMessage {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
        ts_ms: i64,
        is_mine: bool,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            body: body.into(),
            time: crate::bridge::serialization::time_label(ts_ms),
            ts_ms,
            is_mine,
            status,
            is_edited: false,
            is_revoked: false,
            recalled_text: None,
            recall_deadline: None,
            forwarded_from: None,
            reply_to: None,
            attachment: None,
            reactions: Vec::new(),
        }
    }

    /// 剩余可召回秒数（向上取整），已过期或不可召回时为 None
    pub fn recall_seconds_left(&self, now: Instant) -> Option<u64> {
        if self.is_revoked || !self.is_mine {
            return None;
        }
        let deadline = self.recall_deadline?;
        if deadline <= now {
            return None;
        }
        let left = deadline - now;
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        Some(secs)
    }

    /// 替换为召回后的形态
    pub fn revoke(&mut self, keep_text: bool) {
        let old = std::mem::take(&mut self.body);
        self.recalled_text = if keep_text && self.is_mine && !old.trim().is_empty() {
            Some(old)
        } else {
            None
        };
        self.is_revoked = true;
        self.recall_deadline = None;
        self.attachment = None;
        self.reply_to = None;
        self.reactions.clear();
    }

    /// 由发送载荷构造己方消息（发送成功或重发成功后写入列表）
    pub fn from_outgoing(
        id: impl Into<String>,
        sender: impl Into<String>,
        payload: &OutgoingPayload,
        ts_ms: i64,
    ) -> Self {
        let mut msg = Self::new(id, sender, "", ts_ms, true, MessageStatus::Sent);
        match payload {
            OutgoingPayload::Text { text, reply } => {
                msg.body = text.clone();
                msg.reply_to = reply.as_ref().map(|r| ReplyPreview {
                    sender: String::new(),
                    snippet: r.preview.clone(),
                    message_id: r.message_id.clone(),
                });
            }
            OutgoingPayload::File { path } => {
                let name = std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.clone());
                msg.attachment = Some(Attachment::simple(AttachmentKind::File, name, ""));
            }
            OutgoingPayload::Sticker { sticker_id } => {
                msg.attachment = Some(Attachment::simple(
                    AttachmentKind::Sticker,
                    sticker_id.clone(),
                    "",
                ));
            }
            OutgoingPayload::Location {
                lat_e7,
                lon_e7,
                label,
            } => {
                let meta = format!(
                    "{:.5}, {:.5}",
                    f64::from(*lat_e7) / 1e7,
                    f64::from(*lon_e7) / 1e7
                );
                msg.attachment = Some(Attachment::simple(AttachmentKind::Location, label.clone(), meta));
            }
            OutgoingPayload::Contact { username, display } => {
                let shown = if display.trim().is_empty() { username } else { display };
                msg.body = format!("[Contact] {}", shown);
            }
        }
        msg
    }

    /// 由原生历史记录构造消息
    pub fn from_history(entry: HistoryEntry, me: &str, recall_deadline: Option<Instant>) -> Self {
        let ts_ms = entry.timestamp_sec.saturating_mul(1000);
        let status = match entry.status {
            HistoryStatus::Sent => MessageStatus::Sent,
            HistoryStatus::Delivered => MessageStatus::Delivered,
            HistoryStatus::Read => MessageStatus::Read,
            HistoryStatus::Failed => MessageStatus::Failed,
        };
        let sender = if entry.outgoing {
            me.to_string()
        } else {
            entry.sender.clone()
        };
        let mut msg = Self::new(entry.message_id, sender, "", ts_ms, entry.outgoing, status);
        match entry.kind {
            HistoryKind::Text | HistoryKind::System => msg.body = entry.text,
            HistoryKind::File => {
                msg.attachment = Some(Attachment {
                    kind: AttachmentKind::File,
                    label: entry.file_name,
                    meta: human_size(entry.file_size),
                    state: TransferState::Ready,
                    progress: 0.0,
                    file_id: Some(entry.file_id).filter(|id| !id.is_empty()),
                    file_key_hex: Some(hex::encode(&entry.file_key))
                        .filter(|k| !k.is_empty()),
                    file_size: Some(entry.file_size),
                });
            }
            HistoryKind::Sticker => {
                msg.attachment = Some(Attachment::simple(
                    AttachmentKind::Sticker,
                    entry.sticker_id,
                    "",
                ));
            }
        }
        if msg.is_mine && entry.kind != HistoryKind::System {
            msg.recall_deadline = recall_deadline;
        }
        msg
    }

    /// 会话列表里展示的摘要
    pub fn preview_text(&self) -> String {
        if self.is_revoked {
            return if self.is_mine {
                "You recalled a message".to_string()
            } else {
                format!("{} recalled a message", self.sender)
            };
        }
        if !self.body.is_empty() {
            return self.body.clone();
        }
        match self.attachment.as_ref().map(|a| a.kind) {
            Some(AttachmentKind::File) => "[File]".to_string(),
            Some(AttachmentKind::Voice) => "[Voice]".to_string(),
            Some(AttachmentKind::Photo) => "[Photo]".to_string(),
            Some(AttachmentKind::Location) => "[Location]".to_string(),
            Some(AttachmentKind::Sticker) => "[Sticker]".to_string(),
            None => String::new(),
        }
    }
}

/// 待确认删除：在截止时刻前可撤销
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub message: ChatMessage,
    /// 删除前在可见列表中的位置
    pub index: usize,
    pub deadline: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_merge_is_monotonic() {
        use MessageStatus::*;
        assert_eq!(Read.merge(Sent), Read);
        assert_eq!(Delivered.merge(Delivered), Delivered);
        assert_eq!(Sent.merge(Read), Read);
        assert_eq!(Failed.merge(Sent), Sent);
        assert_eq!(Sending.merge(Failed), Failed);
        assert_eq!(Delivered.merge(Failed), Delivered);
        assert_eq!(Failed.merge(Sending), Failed);
    }

    #[test]
    fn countdown_uses_monotonic_deadline() {
        let now = Instant::now();
        let mut m = ChatMessage::new("m1", "me", "hi", 0, true, MessageStatus::Sent);
        assert_eq!(m.recall_seconds_left(now), None);
        m.recall_deadline = Some(now + Duration::from_millis(1500));
        assert_eq!(m.recall_seconds_left(now), Some(2));
        assert_eq!(m.recall_seconds_left(now + Duration::from_secs(2)), None);
    }

    #[test]
    fn revoke_strips_content() {
        let mut m = ChatMessage::new("m1", "me", "secret", 0, true, MessageStatus::Read);
        m.attachment = Some(Attachment::simple(AttachmentKind::Photo, "p", "1 KB"));
        m.reactions.push(MessageReaction {
            label: "👍".into(),
            count: 2,
        });
        m.reply_to = Some(ReplyPreview {
            sender: "bob".into(),
            snippet: "x".into(),
            message_id: "m0".into(),
        });
        m.recall_deadline = Some(Instant::now() + Duration::from_secs(60));
        m.revoke(true);
        assert!(m.is_revoked);
        assert_eq!(m.body, "");
        assert_eq!(m.recall_seconds_left(Instant::now()), None);
        assert!(m.attachment.is_none() && m.reply_to.is_none() && m.reactions.is_empty());
        assert_eq!(m.recalled_text.as_deref(), Some("secret"));
        assert_eq!(m.status, MessageStatus::Read);
    }

    #[test]
    fn outgoing_location_carries_coordinates() {
        let m = ChatMessage::from_outgoing(
            "m1",
            "me",
            &OutgoingPayload::Location {
                lat_e7: 315_000_000,
                lon_e7: -1_200_000_000,
                label: "Office".into(),
            },
            0,
        );
        let a = m.attachment.unwrap();
        assert_eq!(a.kind, AttachmentKind::Location);
        assert_eq!(a.meta, "31.50000, -120.00000");
        assert!(m.is_mine);
        assert_eq!(m.status, MessageStatus::Sent);
    }

    #[test]
    fn history_file_entry_is_downloadable() {
        let entry = HistoryEntry {
            kind: HistoryKind::File,
            status: HistoryStatus::Delivered,
            is_group: false,
            outgoing: false,
            timestamp_sec: 10,
            conv_id: "bob".into(),
            sender: "bob".into(),
            message_id: "h1".into(),
            text: String::new(),
            file_id: "f1".into(),
            file_key: vec![0xab, 0xcd],
            file_name: "a.pdf".into(),
            file_size: 2048,
            sticker_id: String::new(),
        };
        let m = ChatMessage::from_history(entry, "me", Some(Instant::now()));
        assert_eq!(m.ts_ms, 10_000);
        assert_eq!(m.sender, "bob");
        // 对方的消息不可召回
        assert!(m.recall_deadline.is_none());
        let a = m.attachment.unwrap();
        assert_eq!(a.file_key_hex.as_deref(), Some("abcd"));
        assert_eq!(a.meta, "2.0 KB");
    }

    #[test]
    fn inbound_revoke_keeps_nothing() {
        let mut m = ChatMessage::new("m1", "bob", "secret", 0, false, MessageStatus::Delivered);
        m.revoke(true);
        assert!(m.recalled_text.is_none());
        assert_eq!(m.preview_text(), "bob recalled a message");
    }
}
