//! 消费组监督循环
//!
//! 状态流转：`Initializing → Joined → Consuming → (Rejoining | Cancelled)`。
//! 消费会话出错时记录日志并按退避策略重新进入；关闭信号在每次会话结束后
//! 以及退避等待期间检查。无论以何种方式退出，都会关闭消费组客户端。

use std::sync::Arc;

use notify_shared::consumer_group::{ClaimHandler, ConsumerGroup, is_cancelled};
use notify_shared::error::Result;
use notify_shared::observability::metrics;
use notify_shared::retry::{Backoff, RetryPolicy};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 消费者当前所处阶段，供就绪探针读取
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// 正在创建消费组客户端
    Initializing,
    /// 客户端已就绪，尚未进入消费会话
    Joined,
    /// 消费会话进行中
    Consuming,
    /// 会话出错，等待重新进入
    Rejoining,
    /// 已收到关闭信号并释放客户端
    Cancelled,
}

impl ConsumerState {
    /// 创建状态通道，初始为 `Initializing`
    pub fn channel() -> (watch::Sender<Self>, watch::Receiver<Self>) {
        watch::channel(Self::Initializing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Joined => "joined",
            Self::Consuming => "consuming",
            Self::Rejoining => "rejoining",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 消费组监督者
///
/// 持有消费组客户端的所有权，在独立任务中反复调用 `consume`。
pub struct ConsumerGroupSupervisor<G: ConsumerGroup> {
    group: G,
    topics: Vec<String>,
    handler: Arc<dyn ClaimHandler>,
    backoff: Backoff,
    state: watch::Sender<ConsumerState>,
}

impl<G: ConsumerGroup> ConsumerGroupSupervisor<G> {
    /// 接管已加入的消费组客户端
    pub fn new(
        group: G,
        topics: Vec<String>,
        handler: Arc<dyn ClaimHandler>,
        policy: RetryPolicy,
        state: watch::Sender<ConsumerState>,
    ) -> Self {
        state.send_replace(ConsumerState::Joined);
        Self {
            group,
            topics,
            handler,
            backoff: Backoff::new(policy),
            state,
        }
    }

    /// 订阅状态变化
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConsumerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = prev.as_str(), to = next.as_str(), "消费者状态变更");
        }
    }

    /// 运行直到关闭信号到达
    ///
    /// 正常关闭返回 `Ok(())`；遇到不可重试错误，或配置了重试上限且已耗尽时，
    /// 返回最后一次错误。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let group_id = self.group.group_id().to_string();
        info!(group_id = %group_id, topics = ?self.topics, "消费组监督循环启动");

        let outcome = loop {
            if is_cancelled(&shutdown) {
                break Ok(());
            }

            self.set_state(ConsumerState::Consuming);
            metrics::record_session_started(&group_id);

            let result = self
                .group
                .consume(&mut shutdown, &self.topics, Arc::clone(&self.handler))
                .await;

            match result {
                Ok(()) => self.backoff.reset(),
                Err(e) => {
                    error!(
                        error = %e,
                        code = e.code(),
                        group_id = %group_id,
                        attempt = self.backoff.attempt() + 1,
                        "消费会话出错"
                    );
                    metrics::record_consume_error(&group_id, e.code());

                    if is_cancelled(&shutdown) {
                        break Ok(());
                    }
                    if !e.is_retryable() {
                        error!(group_id = %group_id, "消费会话出现不可重试错误，停止消费");
                        break Err(e);
                    }
                    self.set_state(ConsumerState::Rejoining);

                    let Some(delay) = self.backoff.next_delay() else {
                        error!(group_id = %group_id, attempts = self.backoff.attempt(), "已达重试上限，放弃重新加入");
                        break Err(e);
                    };

                    if !delay.is_zero() {
                        warn!(delay_ms = delay.as_millis() as u64, "等待后重新进入消费会话");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.wait_for(|stop| *stop) => {}
                        }
                    }
                }
            }
        };

        self.group.close().await;
        self.set_state(ConsumerState::Cancelled);
        info!(group_id = %group_id, "消费组监督循环已退出");

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::NotificationClaimHandler;
    use crate::models::{NotificationRecord, Participant};
    use crate::store::NotificationStore;
    use notify_shared::error::NotifyError;
    use notify_shared::test_utils::{MemoryConsumerGroup, TEST_TOPIC, consumer_message};
    use std::time::Duration;

    fn payload(message: &str) -> Vec<u8> {
        serde_json::to_vec(&NotificationRecord::new(
            Participant { id: 1, name: "Emma".to_string() },
            Participant { id: 2, name: "Bruno".to_string() },
            message,
        ))
        .unwrap()
    }

    fn supervisor(
        group: MemoryConsumerGroup,
        store: Arc<NotificationStore>,
        policy: RetryPolicy,
    ) -> ConsumerGroupSupervisor<MemoryConsumerGroup> {
        let (state_tx, _state_rx) = ConsumerState::channel();
        ConsumerGroupSupervisor::new(
            group,
            vec![TEST_TOPIC.to_string()],
            Arc::new(NotificationClaimHandler::new(store)),
            policy,
            state_tx,
        )
    }

    /// 等待状态达到期望值
    async fn wait_state(rx: &mut watch::Receiver<ConsumerState>, expected: ConsumerState) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
            .await
            .expect("状态等待超时")
            .unwrap();
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&ConsumerState::Rejoining).unwrap(), "\"rejoining\"");
        assert_eq!(ConsumerState::Consuming.as_str(), "consuming");
    }

    #[tokio::test]
    async fn test_new_marks_joined() {
        let store = Arc::new(NotificationStore::new());
        let sup = supervisor(MemoryConsumerGroup::new("g"), store, RetryPolicy::immediate());
        assert_eq!(*sup.state().borrow(), ConsumerState::Joined);
    }

    #[tokio::test]
    async fn test_retries_after_errors_until_cancelled() {
        let group = MemoryConsumerGroup::new("g")
            .then_fail(NotifyError::Kafka("broker down".to_string()))
            .then_fail(NotifyError::SessionAborted("rebalance".to_string()))
            .then_deliver(vec![consumer_message(0, 0, Some("bob"), payload("hi"))]);
        let tracker = group.tracker();
        let store = Arc::new(NotificationStore::new());
        let sup = supervisor(group, Arc::clone(&store), RetryPolicy::immediate());
        let mut state = sup.state();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sup.run(rx));

        // 两次失败 + 一次投递之后，第四次会话阻塞在关闭信号上
        tokio::time::timeout(Duration::from_secs(2), async {
            while tracker.calls() < 4 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("监督循环未重新进入会话");
        assert_eq!(*state.borrow(), ConsumerState::Consuming);
        assert_eq!(store.get("bob").len(), 1);
        assert_eq!(tracker.marked(), vec![(0, 0)]);

        tx.send(true).unwrap();
        let result = task.await.unwrap();

        assert!(result.is_ok());
        assert!(tracker.is_closed());
        wait_state(&mut state, ConsumerState::Cancelled).await;
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let group = MemoryConsumerGroup::new("g").then_fail(NotifyError::Kafka("broker down".to_string()));
        let tracker = group.tracker();
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            jitter: false,
            ..RetryPolicy::default()
        };
        let sup = supervisor(group, Arc::new(NotificationStore::new()), policy);
        let mut state = sup.state();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sup.run(rx));

        wait_state(&mut state, ConsumerState::Rejoining).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("退避等待未被关闭信号打断")
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(tracker.calls(), 1);
        assert!(tracker.is_closed());
        assert_eq!(*state.borrow(), ConsumerState::Cancelled);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_consumes() {
        let group = MemoryConsumerGroup::new("g");
        let tracker = group.tracker();
        let sup = supervisor(group, Arc::new(NotificationStore::new()), RetryPolicy::immediate());
        let state = sup.state();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        sup.run(rx).await.unwrap();

        assert_eq!(tracker.calls(), 0);
        assert!(tracker.is_closed());
        assert_eq!(*state.borrow(), ConsumerState::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_cancels() {
        let group = MemoryConsumerGroup::new("g");
        let tracker = group.tracker();
        let sup = supervisor(group, Arc::new(NotificationStore::new()), RetryPolicy::immediate());

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sup.run(rx));
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("发送端丢弃后应退出")
            .unwrap();
        assert!(result.is_ok());
        assert!(tracker.is_closed());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let group = MemoryConsumerGroup::new("g")
            .then_fail(NotifyError::Kafka("first".to_string()))
            .then_fail(NotifyError::Kafka("second".to_string()));
        let tracker = group.tracker();
        let policy = RetryPolicy {
            max_retries: Some(1),
            ..RetryPolicy::immediate()
        };
        let sup = supervisor(group, Arc::new(NotificationStore::new()), policy);

        let (_tx, rx) = watch::channel(false);
        let result = sup.run(rx).await;

        assert!(matches!(result, Err(NotifyError::Kafka(msg)) if msg == "second"));
        assert_eq!(tracker.calls(), 2);
        assert!(tracker.is_closed());
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_loop() {
        let group = MemoryConsumerGroup::new("g")
            .then_fail(NotifyError::Internal("消费组客户端已关闭".to_string()))
            .then_deliver(Vec::new());
        let tracker = group.tracker();
        let sup = supervisor(group, Arc::new(NotificationStore::new()), RetryPolicy::immediate());
        let state = sup.state();

        let (_tx, rx) = watch::channel(false);
        let result = sup.run(rx).await;

        assert!(matches!(result, Err(NotifyError::Internal(_))));
        assert_eq!(tracker.calls(), 1);
        assert!(tracker.is_closed());
        assert_eq!(*state.borrow(), ConsumerState::Cancelled);
    }
}
