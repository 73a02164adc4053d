//! 待重发队列
//!
//! 原生层已分配消息 ID 但发送失败（且错误可重试）的消息在这里排队，
//! 在线时每个轮询周期最多重发若干条，按指数退避安排下一次尝试。

use crate::bridge::native::{NativeResult, OutgoingPayload};
use crate::bridge::state::BridgeState;
use crate::bridge::types::{BridgeError, BridgeResult, ConvRef};
use std::collections::BTreeMap;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

/// 每个周期最多重发条数
pub const MAX_RETRIES_PER_TICK: usize = 3;
const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOutgoing {
    pub conv: ConvRef,
    pub message_id: String,
    pub payload: OutgoingPayload,
    pub attempts: u32,
    pub next_retry_at: Instant,
}

/// 第 `attempts` 次失败后的等待时间：min(30s, 1s << min(attempts, 5))
pub fn backoff(attempts: u32) -> Duration {
    let shift = attempts.min(5);
    Duration::from_millis(MAX_BACKOFF_MS.min(1000u64 << shift))
}

/// 不可重试的发送错误（重试也不会成功）
pub fn is_non_retryable(error: &str) -> bool {
    const PATTERNS: [&str; 9] = [
        "not friends",
        "recipient not found",
        "invalid recipient",
        "recipient empty",
        "payload too large",
        "payload empty",
        "peer empty",
        "not in group",
        "not supported",
    ];
    let e = error.trim().to_lowercase();
    !e.is_empty() && PATTERNS.iter().any(|p| e.contains(p))
}

#[derive(Debug, Default)]
pub struct Outbox {
    entries: BTreeMap<String, PendingOutgoing>,
}

impl Outbox {
    pub fn enqueue(&mut self, conv: ConvRef, message_id: String, payload: OutgoingPayload, now: Instant) {
        self.entries.insert(
            message_id.clone(),
            PendingOutgoing {
                conv,
                message_id,
                payload,
                attempts: 0,
                next_retry_at: now + backoff(0),
            },
        );
    }

    pub fn get(&self, message_id: &str) -> Option<&PendingOutgoing> {
        self.entries.get(message_id)
    }

    pub fn remove(&mut self, message_id: &str) -> Option<PendingOutgoing> {
        self.entries.remove(message_id)
    }

    /// 到期的条目（最多 `limit` 条，按下次重试时刻排序）
    pub fn due(&self, now: Instant, limit: usize) -> Vec<PendingOutgoing> {
        let mut due: Vec<&PendingOutgoing> = self
            .entries
            .values()
            .filter(|p| p.next_retry_at <= now)
            .collect();
        due.sort_by_key(|p| p.next_retry_at);
        due.into_iter().take(limit).cloned().collect()
    }

    /// 记录一次失败并安排下次重试
    pub fn record_failure(&mut self, message_id: &str, now: Instant) {
        if let Some(p) = self.entries.get_mut(message_id) {
            p.attempts = p.attempts.saturating_add(1);
            p.next_retry_at = now + backoff(p.attempts);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PendingOutgoing> {
        self.entries.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl BridgeState {
    /// 应用一次重发的结果：成功后以 Sent 写入列表，失败则退避或放弃
    pub async fn finish_resend(
        &mut self,
        pending: &PendingOutgoing,
        result: NativeResult<()>,
        now: Instant,
    ) -> BridgeResult<()> {
        match result {
            Ok(()) => {
                info!("[Outbox] ✅ 重发成功: {}", pending.message_id);
                self.outbox.remove(&pending.message_id);
                self.record_sent(&pending.conv, &pending.message_id, &pending.payload)
                    .await;
                Ok(())
            }
            Err(e) => {
                if is_non_retryable(&e.message) {
                    warn!("[Outbox] ❌ 放弃重发 {}: {}", pending.message_id, e.message);
                    self.outbox.remove(&pending.message_id);
                } else {
                    self.outbox.record_failure(&pending.message_id, now);
                    warn!("[Outbox] ⚠️ 重发失败 {}: {}", pending.message_id, e.message);
                }
                Err(BridgeError::Native(e.message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> OutgoingPayload {
        OutgoingPayload::Text {
            text: t.to_string(),
            reply: None,
        }
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        assert_eq!(backoff(0), Duration::from_millis(1000));
        assert_eq!(backoff(1), Duration::from_millis(2000));
        assert_eq!(backoff(4), Duration::from_millis(16000));
        assert_eq!(backoff(5), Duration::from_millis(30000));
        assert_eq!(backoff(50), Duration::from_millis(30000));
    }

    #[test]
    fn classifies_errors() {
        assert!(is_non_retryable("Not Friends"));
        assert!(is_non_retryable("send failed: payload too large"));
        assert!(!is_non_retryable("network timeout"));
        assert!(!is_non_retryable(""));
    }

    #[test]
    fn due_respects_limit_and_schedule() {
        let now = Instant::now();
        let mut outbox = Outbox::default();
        for i in 0..5 {
            outbox.enqueue(ConvRef::peer("a"), format!("m{}", i), text("x"), now);
        }
        assert!(outbox.due(now, MAX_RETRIES_PER_TICK).is_empty());
        let later = now + Duration::from_secs(1);
        assert_eq!(outbox.due(later, MAX_RETRIES_PER_TICK).len(), 3);

        outbox.record_failure("m0", later);
        let entry = outbox.get("m0").unwrap();
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.next_retry_at, later + Duration::from_secs(2));
        assert!(outbox.due(later, 10).iter().all(|p| p.message_id != "m0"));
    }
}
