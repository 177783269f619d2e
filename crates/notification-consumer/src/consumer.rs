//! 通知 claim 处理器
//!
//! 从分区 claim 中逐条读取消息：key 即收件人 ID，负载解码为通知记录，
//! 写入存储后再确认位点，保证“已确认即已写入”。
//! 解码失败的消息记录日志后跳过，不确认、也不打断当前 claim。

use std::sync::Arc;

use async_trait::async_trait;
use notify_shared::consumer_group::{ClaimHandler, GroupSession, PartitionClaim};
use notify_shared::kafka::ConsumerMessage;
use notify_shared::observability::metrics;
use tracing::{debug, info, warn};

use crate::error::ConsumerError;
use crate::models::NotificationRecord;
use crate::store::NotificationStore;

/// 通知消费者的 claim 处理器
pub struct NotificationClaimHandler {
    store: Arc<NotificationStore>,
}

impl NotificationClaimHandler {
    pub fn new(store: Arc<NotificationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClaimHandler for NotificationClaimHandler {
    async fn setup(&self, session: &dyn GroupSession) -> notify_shared::error::Result<()> {
        info!(generation = session.generation(), "通知消费会话开始");
        Ok(())
    }

    async fn cleanup(&self, session: &dyn GroupSession) -> notify_shared::error::Result<()> {
        metrics::set_store_recipients(self.store.recipient_count());
        info!(
            generation = session.generation(),
            recipients = self.store.recipient_count(),
            records = self.store.total_records(),
            "通知消费会话结束"
        );
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: Arc<dyn GroupSession>,
        mut claim: PartitionClaim,
    ) -> notify_shared::error::Result<()> {
        info!(topic = claim.topic(), partition = claim.partition(), "开始处理分区 claim");

        while let Some(msg) = claim.next().await {
            if let Err(e) = handle_message(&self.store, session.as_ref(), &msg) {
                warn!(
                    error = %e,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "跳过无法解码的通知消息"
                );
                metrics::record_decode_failure(&msg.topic, e.skip_reason());
            }
        }

        info!(topic = claim.topic(), partition = claim.partition(), "分区 claim 已结束");
        Ok(())
    }
}

/// 处理单条消息：解码 → 写入存储 → 确认位点
pub fn handle_message(
    store: &NotificationStore,
    session: &dyn GroupSession,
    msg: &ConsumerMessage,
) -> Result<(), ConsumerError> {
    let (recipient_id, record) = decode_message(msg)?;

    store.add(&recipient_id, record);
    metrics::set_store_recipients(store.recipient_count());
    session.mark_message(msg);

    metrics::record_notification_consumed(&msg.topic, msg.partition);
    debug!(
        recipient_id = %recipient_id,
        partition = msg.partition,
        offset = msg.offset,
        "通知已写入存储"
    );
    Ok(())
}

/// 从消息中提取收件人 ID 并解码通知记录
pub fn decode_message(msg: &ConsumerMessage) -> Result<(String, NotificationRecord), ConsumerError> {
    let recipient_id = msg.key_str().ok_or_else(|| ConsumerError::MissingKey {
        topic: msg.topic.clone(),
        partition: msg.partition,
        offset: msg.offset,
    })?;

    let record: NotificationRecord = serde_json::from_slice(&msg.payload)
        .map_err(|e| ConsumerError::DeserializationFailed(e.to_string()))?;

    Ok((recipient_id.to_string(), record))
}
