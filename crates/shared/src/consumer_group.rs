//! 消费组抽象
//!
//! 将“加入消费组 → 领取分区 → 逐条消费并确认”的生命周期抽象为
//! `ConsumerGroup` / `ClaimHandler` / `GroupSession` 三个接口：
//! - `ConsumerGroup::consume` 阻塞执行一次消费会话，按分区把消息分发给 handler；
//! - `ClaimHandler` 提供 setup / cleanup / consume_claim 三个回调；
//! - `GroupSession::mark_message` 在消息处理完成后确认位点。
//!
//! 业务服务只依赖这些接口，rdkafka 的具体实现由 `KafkaConsumerGroup` 提供，
//! 测试中可以替换为内存实现。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::{NotifyError, Result};
use crate::kafka::ConsumerMessage;

/// 单个分区 claim 的缓冲深度，写满后消费循环会等待 handler 追上
const CLAIM_BUFFER: usize = 256;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// 关闭信号已发出，或发送端已被丢弃
pub fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

// ---------------------------------------------------------------------------
// GroupSession / PartitionClaim / ClaimHandler
// ---------------------------------------------------------------------------

/// 一次消费组会话（一代成员关系）
pub trait GroupSession: Send + Sync {
    /// 确认消息已处理，位点随后由客户端提交
    fn mark_message(&self, msg: &ConsumerMessage);

    /// 会话代数，每次重新进入 consume 递增
    fn generation(&self) -> u64;
}

/// 分区 claim：来自单个分区、按位点有序的独占消息流
#[derive(Debug)]
pub struct PartitionClaim {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<ConsumerMessage>,
}

impl PartitionClaim {
    pub fn new(topic: impl Into<String>, partition: i32, messages: mpsc::Receiver<ConsumerMessage>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            messages,
        }
    }

    /// 创建 claim 及其投递端
    pub fn channel(
        topic: impl Into<String>,
        partition: i32,
        capacity: usize,
    ) -> (mpsc::Sender<ConsumerMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(topic, partition, rx))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// 等待下一条消息；投递端关闭（会话结束）后返回 None
    pub async fn next(&mut self) -> Option<ConsumerMessage> {
        self.messages.recv().await
    }
}

/// 分区 claim 处理器
#[async_trait]
pub trait ClaimHandler: Send + Sync {
    /// 会话开始、分发任何 claim 之前调用
    async fn setup(&self, _session: &dyn GroupSession) -> Result<()> {
        Ok(())
    }

    /// 会话内所有 claim 处理结束后调用
    async fn cleanup(&self, _session: &dyn GroupSession) -> Result<()> {
        Ok(())
    }

    /// 处理一个分区 claim，直到消息流结束
    async fn consume_claim(&self, session: Arc<dyn GroupSession>, claim: PartitionClaim) -> Result<()>;
}

/// 消费组客户端
#[async_trait]
pub trait ConsumerGroup: Send {
    fn group_id(&self) -> &str;

    /// 执行一次消费会话
    ///
    /// 关闭信号到达时返回 `Ok(())`；传输错误或会话被打断时返回错误，
    /// 由调用方决定是否重新进入。
    async fn consume(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
    ) -> Result<()>;

    /// 释放客户端连接，可重复调用
    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// KafkaConsumerGroup
// ---------------------------------------------------------------------------

/// 基于 rdkafka `StreamConsumer` 的消费组实现
///
/// 分区分配由 librdkafka 完成；本实现把单一消息流按 (topic, partition)
/// 拆分为多个 `PartitionClaim`，每个 claim 在独立任务中处理，
/// 因此不同分区可以并发写入，同一分区内保持顺序。
///
/// 自动提交开启、自动存储位点关闭：只有 `mark_message` 过的位点才会被提交。
pub struct KafkaConsumerGroup {
    group_id: String,
    consumer: Option<Arc<StreamConsumer>>,
    generation: u64,
}

impl KafkaConsumerGroup {
    /// 创建客户端并确认 broker 可达
    pub async fn join(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| NotifyError::Kafka(format!("创建消费者失败: {e}")))?;
        let consumer = Arc::new(consumer);

        // 元数据请求是阻塞调用，放到阻塞线程池执行
        let client = Arc::clone(&consumer);
        let topic = config.topic.clone();
        tokio::task::spawn_blocking(move || {
            client
                .fetch_metadata(Some(&topic), METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| NotifyError::Internal(format!("元数据探测任务失败: {e}")))?
        .map_err(|e| NotifyError::Kafka(format!("连接 broker 失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费组客户端已初始化"
        );
        Ok(Self {
            group_id: config.consumer_group.clone(),
            consumer: Some(consumer),
            generation: 0,
        })
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn consume(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
    ) -> Result<()> {
        if is_cancelled(shutdown) {
            return Ok(());
        }

        let consumer = self
            .consumer
            .clone()
            .ok_or_else(|| NotifyError::Internal("消费组客户端已关闭".to_string()))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| NotifyError::Kafka(format!("订阅 topic 失败: {e}")))?;

        self.generation += 1;
        let session: Arc<dyn GroupSession> = Arc::new(KafkaSession {
            consumer: Arc::clone(&consumer),
            generation: self.generation,
        });

        handler.setup(session.as_ref()).await?;
        info!(group_id = %self.group_id, generation = self.generation, ?topics, "消费会话已开始");

        let mut claims: HashMap<(String, i32), mpsc::Sender<ConsumerMessage>> = HashMap::new();
        let mut workers = JoinSet::new();

        let outcome = {
            let stream = consumer.stream();
            futures::pin_mut!(stream);

            loop {
                tokio::select! {
                    // 偏向关闭信号，保证收到关闭时能尽快退出
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("收到关闭信号，消费会话结束");
                            break Ok(());
                        }
                    }

                    msg_result = stream.next() => {
                        let msg = match msg_result {
                            None => break Err(NotifyError::SessionAborted("Kafka 消息流意外结束".to_string())),
                            Some(Err(e)) => break Err(NotifyError::Kafka(format!("接收消息出错: {e}"))),
                            Some(Ok(borrowed)) => ConsumerMessage::from_borrowed(&borrowed),
                        };

                        debug!(
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            "收到 Kafka 消息"
                        );

                        let sender = claims
                            .entry((msg.topic.clone(), msg.partition))
                            .or_insert_with(|| {
                                let (tx, claim) = PartitionClaim::channel(msg.topic.clone(), msg.partition, CLAIM_BUFFER);
                                let handler = Arc::clone(&handler);
                                let session = Arc::clone(&session);
                                info!(topic = %msg.topic, partition = msg.partition, "领取分区 claim");
                                workers.spawn(async move {
                                    let topic = claim.topic().to_string();
                                    let partition = claim.partition();
                                    if let Err(e) = handler.consume_claim(session, claim).await {
                                        error!(error = %e, topic = %topic, partition, "分区 claim 处理失败");
                                    }
                                });
                                tx
                            });

                        if let Err(mpsc::error::SendError(msg)) = sender.send(msg).await {
                            // claim 处理器已提前退出：回退位点，让该消息在下一次会话中重新投递
                            if let Err(e) = consumer.seek(&msg.topic, msg.partition, Offset::Offset(msg.offset), SEEK_TIMEOUT) {
                                warn!(error = %e, topic = %msg.topic, partition = msg.partition, "回退分区位点失败");
                            }
                            break Err(NotifyError::SessionAborted(format!(
                                "分区 {}/{} 的 claim 处理器已退出",
                                msg.topic, msg.partition
                            )));
                        }
                    }
                }
            }
        };

        // 关闭所有投递端，claim 处理完已缓冲的消息后自然结束
        drop(claims);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "分区 claim 任务异常退出");
            }
        }

        if let Err(e) = handler.cleanup(session.as_ref()).await {
            warn!(error = %e, "消费会话清理失败");
        }
        info!(group_id = %self.group_id, generation = self.generation, "消费会话已结束");

        outcome
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(group_id = %self.group_id, "Kafka 消费组客户端已关闭");
        }
    }
}

/// rdkafka 会话：确认即存储下一条待消费位点，由自动提交定期刷到 broker
struct KafkaSession {
    consumer: Arc<StreamConsumer>,
    generation: u64,
}

impl GroupSession for KafkaSession {
    fn mark_message(&self, msg: &ConsumerMessage) {
        if let Err(e) = self
            .consumer
            .store_offset(&msg.topic, msg.partition, msg.offset + 1)
        {
            warn!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "存储消费位点失败"
            );
        }
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message(offset: i64) -> ConsumerMessage {
        ConsumerMessage {
            topic: "notifications".to_string(),
            partition: 3,
            offset,
            key: Some("alice".to_string()),
            payload: Vec::new(),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_partition_claim_preserves_order() {
        let (tx, mut claim) = PartitionClaim::channel("notifications", 3, 8);
        assert_eq!(claim.topic(), "notifications");
        assert_eq!(claim.partition(), 3);

        for offset in 0..5 {
            tx.send(message(offset)).await.unwrap();
        }
        drop(tx);

        let mut offsets = Vec::new();
        while let Some(msg) = claim.next().await {
            offsets.push(msg.offset);
        }
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_claim_handler_default_setup_and_cleanup() {
        struct Noop;

        #[async_trait]
        impl ClaimHandler for Noop {
            async fn consume_claim(&self, _session: Arc<dyn GroupSession>, _claim: PartitionClaim) -> Result<()> {
                Ok(())
            }
        }

        struct NullSession;

        impl GroupSession for NullSession {
            fn mark_message(&self, _msg: &ConsumerMessage) {}
            fn generation(&self) -> u64 {
                1
            }
        }

        let handler = Noop;
        assert!(handler.setup(&NullSession).await.is_ok());
        assert!(handler.cleanup(&NullSession).await.is_ok());
    }
}
