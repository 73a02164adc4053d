//! 媒体中继与离线载荷日志（有界，超出时丢弃最旧的条目）

use crate::bridge::event::RelayPayload;
use crate::bridge::serialization::payload_preview;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const RELAY_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRelayLog {
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    pub peer: String,
    pub sender: String,
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "payloadSize")]
    pub payload_size: usize,
    #[serde(rename = "payloadPreview")]
    pub payload_preview: String,
}

impl MediaRelayLog {
    pub fn from_payload(p: &RelayPayload, is_group: bool, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            is_group,
            peer: p.peer.clone(),
            sender: p.sender.clone(),
            group_id: p.group_id.clone(),
            payload_size: p.payload.len(),
            payload_preview: payload_preview(&p.payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePayloadLog {
    #[serde(rename = "timestampMs")]
    pub timestamp_ms: i64,
    pub peer: String,
    pub sender: String,
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "payloadSize")]
    pub payload_size: usize,
    #[serde(rename = "payloadPreview")]
    pub payload_preview: String,
}

impl OfflinePayloadLog {
    pub fn from_payload(p: &RelayPayload, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            peer: p.peer.clone(),
            sender: p.sender.clone(),
            group_id: p.group_id.clone(),
            payload_size: p.payload.len(),
            payload_preview: payload_preview(&p.payload),
        }
    }
}

/// 定长环形日志
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Clone> Default for BoundedLog<T> {
    fn default() -> Self {
        Self::new(RELAY_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut log = BoundedLog::new(2);
        log.push(1);
        log.push(2);
        log.push(3);
        assert_eq!(log.snapshot(), vec![2, 3]);
        log.clear();
        assert!(log.is_empty());
    }
}
