//! 事件轮询任务
//!
//! 登录后以固定节拍运行：每个周期读取会话快照并拉取事件，按倍数周期同步
//! 好友、好友申请与心跳。任务持有关闭信号与会话纪元，纪元变化后的结果一律丢弃。

use crate::bridge::client::{BridgeInner, ClientBridge};
use crate::bridge::dispatch::FollowUp;
use crate::bridge::event::{DecodeError, SdkEvent};
use crate::bridge::group::GroupMemberUi;
use crate::bridge::outbox::MAX_RETRIES_PER_TICK;
use crate::bridge::types::BridgeError;
use std::sync::Weak;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 轮询节拍
#[derive(Debug, Clone)]
pub struct PollCadence {
    pub tick: Duration,
    /// 每 N 个周期同步一次好友与群列表
    pub friends_every: u64,
    pub requests_every: u64,
    pub heartbeat_every: u64,
    pub event_batch: u32,
    pub poll_wait_ms: u32,
    pub outbox_per_tick: usize,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            friends_every: 10,
            requests_every: 20,
            heartbeat_every: 30,
            event_batch: 64,
            poll_wait_ms: 0,
            outbox_per_tick: MAX_RETRIES_PER_TICK,
        }
    }
}

fn every(tick: u64, n: u64) -> bool {
    n > 0 && tick % n == 0
}

/// 运行中的轮询任务
pub struct PollTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTask {
    /// 发出关闭信号并中止任务
    pub fn stop(self) {
        let _ = self.shutdown.send(true);
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// 启动轮询任务；任务只持有弱引用，桥接对象释放后自动退出
pub(crate) fn spawn_poller(inner: Weak<BridgeInner>, epoch: u64, cadence: PollCadence) -> PollTask {
    let (shutdown, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        info!("[Poller] ▶️ 开始轮询 (epoch={}, tick={:?})", epoch, cadence.tick);
        let mut ticker = tokio::time::interval(cadence.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = rx.changed() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let bridge = ClientBridge::from_inner(inner);
                    if !bridge.poll_tick(epoch).await {
                        break;
                    }
                }
            }
        }
        info!("[Poller] 🛑 轮询结束 (epoch={})", epoch);
    });
    PollTask { shutdown, handle }
}

impl ClientBridge {
    /// 手动执行一个轮询周期（未启用自动轮询时使用）
    pub async fn poll_once(&self) {
        let epoch = self.inner.state.lock().await.epoch;
        self.poll_tick(epoch).await;
    }

    /// 单个轮询周期；返回 false 表示任务应当退出
    pub(crate) async fn poll_tick(&self, epoch: u64) -> bool {
        let cadence = self.inner.options.cadence.clone();
        let (native, tick) = {
            let mut st = self.inner.state.lock().await;
            if st.epoch != epoch || !st.logged_in {
                return false;
            }
            let Some(native) = st.native.clone() else {
                return false;
            };
            let tick = st.ticks;
            st.ticks += 1;
            (native, tick)
        };

        // 原生调用在锁外完成
        let session = native.call("session", |sdk| Ok(sdk.session())).await;
        let (max, wait) = (cadence.event_batch, cadence.poll_wait_ms);
        let raw = native
            .call("poll_events", move |sdk| Ok(sdk.poll_events(max, wait)))
            .await
            .unwrap_or_default();
        let (friends, groups) = if every(tick, cadence.friends_every) {
            (
                Some(native.call("sync_friends", |sdk| sdk.sync_friends()).await),
                Some(native.call("list_groups", |sdk| sdk.list_groups()).await),
            )
        } else {
            (None, None)
        };
        let requests = if every(tick, cadence.requests_every) {
            Some(
                native
                    .call("list_friend_requests", |sdk| sdk.list_friend_requests())
                    .await,
            )
        } else {
            None
        };
        let heartbeat = if tick > 0 && every(tick, cadence.heartbeat_every) {
            Some(native.call("heartbeat", |sdk| sdk.heartbeat()).await)
        } else {
            None
        };

        let (follow_ups, due, need_relogin) = {
            let mut st = self.inner.state.lock().await;
            if st.epoch != epoch {
                debug!("[Poller] 丢弃过期周期结果 (epoch={})", epoch);
                return false;
            }
            if let Ok(s) = session {
                st.apply_session(s);
            }

            let mut follow_ups = Vec::new();
            for r in raw {
                match SdkEvent::try_from(r) {
                    Ok(ev) => follow_ups.extend(st.apply_event(ev).await),
                    Err(DecodeError::Empty) => {}
                    Err(e) => warn!("[Poller] ⚠️ 丢弃无法解码的事件: {}", e),
                }
            }

            match friends {
                Some(Ok((list, true))) => st.replace_friends(list).await,
                Some(Err(e)) => warn!("[Poller] ⚠️ 好友同步失败: {}", e),
                _ => {}
            }
            match groups {
                Some(Ok(list)) => st.replace_groups(list).await,
                Some(Err(e)) => warn!("[Poller] ⚠️ 群列表同步失败: {}", e),
                None => {}
            }
            match requests {
                Some(Ok(list)) => st.replace_friend_requests(list),
                Some(Err(e)) => warn!("[Poller] ⚠️ 好友申请同步失败: {}", e),
                None => {}
            }
            if let Some(result) = heartbeat {
                let result = result.map_err(BridgeError::from);
                if let Err(e) = &result {
                    warn!("[Poller] 💔 心跳失败: {}", e);
                }
                st.note(&result);
            }

            let now = Instant::now();
            st.commit_expired_deletes(now).await;
            let due = if st.is_online() {
                st.outbox.due(now, cadence.outbox_per_tick)
            } else {
                Vec::new()
            };
            let need_relogin =
                st.logged_in && st.token.is_empty() && st.pending_server_trust.is_none();
            self.flush(st);
            (follow_ups, due, need_relogin)
        };

        for f in follow_ups {
            match f {
                FollowUp::ReadReceipt { peer, message_id } => {
                    let result = native
                        .call("read_receipt", move |sdk| {
                            sdk.send_read_receipt(&peer, &message_id)
                        })
                        .await;
                    if let Err(e) = result {
                        warn!("[Poller] ⚠️ 已读回执发送失败: {}", e);
                    }
                }
                FollowUp::RefreshGroupMembers(group_id) => {
                    let gid = group_id.clone();
                    let result = native
                        .call("list_group_members", move |sdk| sdk.list_group_members(&gid))
                        .await;
                    let mut st = self.inner.state.lock().await;
                    if st.epoch != epoch {
                        return false;
                    }
                    match result {
                        Ok(list) => {
                            let members: Vec<GroupMemberUi> =
                                list.into_iter().map(Into::into).collect();
                            st.group_members.insert(group_id, members);
                        }
                        Err(e) => warn!("[Poller] ⚠️ 群成员刷新失败 {}: {}", group_id, e),
                    }
                }
            }
        }

        if need_relogin {
            info!("[Poller] 🔁 token 已失效，尝试重新登录");
            let result = native.call("relogin", |sdk| sdk.relogin()).await;
            let session = native.call("session", |sdk| Ok(sdk.session())).await;
            let mut st = self.inner.state.lock().await;
            if st.epoch != epoch {
                return false;
            }
            st.note(&result.map_err(BridgeError::from));
            if let Ok(s) = session {
                st.apply_session(s);
            }
            self.flush(st);
        }

        for pending in due {
            let p = pending.clone();
            let result = native
                .call("resend", move |sdk| {
                    sdk.resend(&p.conv.id, p.conv.is_group, &p.message_id, &p.payload)
                })
                .await;
            let mut st = self.inner.state.lock().await;
            if st.epoch != epoch {
                return false;
            }
            // 自动重发失败不覆盖用户可见的 last_error
            let _ = st.finish_resend(&pending, result, Instant::now()).await;
            self.flush(st);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::client::tests::{bridge_with, logged_in, test_options};
    use crate::bridge::native::{OutgoingPayload, PendingServerTrust};
    use crate::bridge::types::ConvRef;

    fn count(calls: &[String], name: &str) -> usize {
        calls.iter().filter(|c| c.as_str() == name).count()
    }

    #[test]
    fn default_cadence() {
        let c = PollCadence::default();
        assert_eq!(c.tick, Duration::from_millis(500));
        assert_eq!(
            (c.friends_every, c.requests_every, c.heartbeat_every),
            (10, 20, 30)
        );
        assert_eq!(c.outbox_per_tick, 3);
    }

    #[test]
    fn multiples_include_first_tick() {
        assert!(every(0, 10));
        assert!(!every(5, 10));
        assert!(every(20, 10));
        assert!(!every(3, 0));
    }

    #[tokio::test]
    async fn cadence_controls_sync_and_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = test_options(dir.path());
        options.cadence.friends_every = 2;
        options.cadence.heartbeat_every = 3;
        let (bridge, control) = bridge_with(options).await;
        bridge.login("me", "pw").await.unwrap();
        control.clear_calls();
        for _ in 0..4 {
            bridge.poll_once().await;
        }
        let calls = control.calls();
        assert_eq!(count(&calls, "list_friends"), 2);
        assert_eq!(count(&calls, "heartbeat"), 1);
        assert_eq!(count(&calls, "list_friend_requests"), 1);
    }

    #[tokio::test]
    async fn expired_token_triggers_relogin() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        control.drop_token();
        bridge.poll_once().await;
        assert!(control.calls().contains(&"relogin".to_string()));
        assert_eq!(bridge.session().await.token, "mock-token-me");
    }

    #[tokio::test]
    async fn pending_server_trust_suppresses_relogin() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        control.drop_token();
        control.set_pending_server_trust(Some(PendingServerTrust {
            fingerprint: "ab:cd".into(),
            pin: "123456".into(),
        }));
        bridge.poll_once().await;
        assert!(!control.calls().contains(&"relogin".to_string()));
        assert!(bridge.connection_detail().await.to_lowercase().contains("fingerprint"));
    }

    #[tokio::test]
    async fn due_outbox_entries_are_resent() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        let alice = ConvRef::peer("alice");
        let past = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();
        bridge.inner.state.lock().await.outbox.enqueue(
            alice.clone(),
            "m-9".into(),
            OutgoingPayload::Text {
                text: "queued".into(),
                reply: None,
            },
            past,
        );
        bridge.poll_once().await;
        assert!(control.calls().contains(&"resend:alice:m-9".to_string()));
        assert!(bridge.inner.state.lock().await.outbox.is_empty());
        let msgs = bridge.messages(&alice).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body, "queued");
    }

    #[tokio::test]
    async fn stale_epoch_ends_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let (bridge, control) = logged_in(dir.path()).await;
        let epoch = bridge.inner.state.lock().await.epoch;
        control.clear_calls();
        assert!(!bridge.poll_tick(epoch + 1).await);
        assert!(control.calls().is_empty());
        assert!(bridge.poll_tick(epoch).await);
        bridge.logout().await.unwrap();
        assert!(!bridge.poll_tick(epoch).await);
    }
}
