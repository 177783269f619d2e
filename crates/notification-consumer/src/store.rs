//! 进程内通知存储
//!
//! 收件人 ID → 按到达顺序排列的通知列表。整张表由一把读写锁保护：
//! 读请求之间可以并发，写入时独占。通知量不大，跨收件人的写竞争可以接受。

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::NotificationRecord;

/// 并发安全的通知存储
#[derive(Debug, Default)]
pub struct NotificationStore {
    data: RwLock<HashMap<String, Vec<NotificationRecord>>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条通知，收件人不存在时自动创建
    pub fn add(&self, recipient_id: &str, record: NotificationRecord) {
        let mut data = self.data.write();
        data.entry(recipient_id.to_string()).or_default().push(record);
    }

    /// 返回收件人通知列表的快照；未知收件人返回空列表
    pub fn get(&self, recipient_id: &str) -> Vec<NotificationRecord> {
        self.data
            .read()
            .get(recipient_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 收件人数量
    pub fn recipient_count(&self) -> usize {
        self.data.read().len()
    }

    /// 全部通知数量
    pub fn total_records(&self) -> usize {
        self.data.read().values().map(Vec::len).sum()
    }
}
