//! 测试工具模块
//!
//! 提供内存版消费组与消息构造辅助，供各服务在没有 Kafka 的情况下
//! 驱动完整的消费会话（setup → consume_claim → cleanup）。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::consumer_group::{ClaimHandler, ConsumerGroup, GroupSession, PartitionClaim, is_cancelled};
use crate::error::{NotifyError, Result};
use crate::kafka::ConsumerMessage;

/// 测试默认 topic
pub const TEST_TOPIC: &str = "notifications";

/// 构造测试消息
pub fn consumer_message(partition: i32, offset: i64, key: Option<&str>, payload: impl Into<Vec<u8>>) -> ConsumerMessage {
    ConsumerMessage {
        topic: TEST_TOPIC.to_string(),
        partition,
        offset,
        key: key.map(String::from),
        payload: payload.into(),
        timestamp: None,
        headers: HashMap::new(),
    }
}

// ---------------------------------------------------------------------------
// MemoryConsumerGroup
// ---------------------------------------------------------------------------

/// 单次消费会话的脚本
#[derive(Debug)]
pub enum SessionScript {
    /// 按分区把消息分发给 handler，全部处理完后会话以 Ok 结束
    Deliver(Vec<ConsumerMessage>),
    /// 会话立即以错误结束
    Fail(NotifyError),
}

/// 内存版消费组
///
/// 按脚本依次执行会话；脚本耗尽后阻塞到关闭信号到达。
pub struct MemoryConsumerGroup {
    group_id: String,
    script: VecDeque<SessionScript>,
    tracker: GroupTracker,
}

/// 供断言使用的观测句柄
#[derive(Clone, Default)]
pub struct GroupTracker {
    calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    marked: Arc<Mutex<Vec<(i32, i64)>>>,
}

impl GroupTracker {
    /// consume 被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 已确认的 (partition, offset)，按确认顺序
    pub fn marked(&self) -> Vec<(i32, i64)> {
        self.marked.lock().clone()
    }
}

impl MemoryConsumerGroup {
    pub fn new(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            script: VecDeque::new(),
            tracker: GroupTracker::default(),
        }
    }

    pub fn then_deliver(mut self, messages: Vec<ConsumerMessage>) -> Self {
        self.script.push_back(SessionScript::Deliver(messages));
        self
    }

    pub fn then_fail(mut self, err: NotifyError) -> Self {
        self.script.push_back(SessionScript::Fail(err));
        self
    }

    pub fn tracker(&self) -> GroupTracker {
        self.tracker.clone()
    }
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn consume(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        _topics: &[String],
        handler: Arc<dyn ClaimHandler>,
    ) -> Result<()> {
        let generation = self.tracker.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;

        if is_cancelled(shutdown) {
            return Ok(());
        }

        match self.script.pop_front() {
            Some(SessionScript::Fail(err)) => Err(err),
            Some(SessionScript::Deliver(messages)) => {
                let session: Arc<dyn GroupSession> = Arc::new(MemorySession {
                    generation,
                    marked: Arc::clone(&self.tracker.marked),
                });
                deliver(session, handler, messages).await
            }
            None => {
                // 发送端被丢弃同样视为关闭
                let _ = shutdown.wait_for(|stop| *stop).await;
                Ok(())
            }
        }
    }

    async fn close(&mut self) {
        self.tracker.closed.store(true, Ordering::SeqCst);
    }
}

/// 与 Kafka 实现一致：每个分区一个 claim，各自在独立任务中处理
async fn deliver(
    session: Arc<dyn GroupSession>,
    handler: Arc<dyn ClaimHandler>,
    messages: Vec<ConsumerMessage>,
) -> Result<()> {
    handler.setup(session.as_ref()).await?;

    let mut partitions: BTreeMap<(String, i32), Vec<ConsumerMessage>> = BTreeMap::new();
    for msg in messages {
        partitions
            .entry((msg.topic.clone(), msg.partition))
            .or_default()
            .push(msg);
    }

    let mut workers = JoinSet::new();
    for ((topic, partition), batch) in partitions {
        let (tx, claim) = PartitionClaim::channel(topic, partition, batch.len().max(1));
        for msg in batch {
            tx.send(msg)
                .await
                .map_err(|_| NotifyError::Internal("claim 接收端已关闭".to_string()))?;
        }
        drop(tx);

        let handler = Arc::clone(&handler);
        let session = Arc::clone(&session);
        workers.spawn(async move { handler.consume_claim(session, claim).await });
    }

    while let Some(joined) = workers.join_next().await {
        joined.map_err(|e| NotifyError::Internal(format!("claim 任务异常退出: {e}")))??;
    }

    handler.cleanup(session.as_ref()).await
}

struct MemorySession {
    generation: u64,
    marked: Arc<Mutex<Vec<(i32, i64)>>>,
}

impl GroupSession for MemorySession {
    fn mark_message(&self, msg: &ConsumerMessage) {
        self.marked.lock().push((msg.partition, msg.offset));
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}
