//! 通知查询服务
//!
//! 只读访问通知存储，不接触 broker。

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{ConsumerError, Result};
use crate::models::NotificationRecord;
use crate::store::NotificationStore;

/// 收件人没有任何通知时返回的提示
pub const EMPTY_NOTIFICATIONS_MESSAGE: &str = "No notifications found";

/// 查询响应体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub notifications: Vec<NotificationRecord>,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<NotificationStore>,
}

impl QueryService {
    pub fn new(store: Arc<NotificationStore>) -> Self {
        Self { store }
    }

    /// 按收件人 ID 查询通知
    ///
    /// ID 与消息 key 按原样比较，只有空字符串返回 `RecipientMissing`；
    /// 未知收件人返回带提示的空列表。
    pub fn handle_query(&self, recipient_id: &str) -> Result<NotificationsResponse> {
        if recipient_id.is_empty() {
            return Err(ConsumerError::RecipientMissing);
        }

        let notifications = self.store.get(recipient_id);
        debug!(recipient_id = %recipient_id, count = notifications.len(), "查询通知");

        let message = notifications
            .is_empty()
            .then(|| EMPTY_NOTIFICATIONS_MESSAGE.to_string());

        Ok(NotificationsResponse {
            message,
            notifications,
        })
    }
}
