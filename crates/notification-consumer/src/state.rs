//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use std::sync::Arc;

use tokio::sync::watch;

use crate::service::QueryService;
use crate::store::NotificationStore;
use crate::supervisor::ConsumerState;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub store: Arc<NotificationStore>,
    /// 消费者阶段，由监督循环发布
    pub consumer_state: watch::Receiver<ConsumerState>,
    pub service_name: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Arc<NotificationStore>,
        consumer_state: watch::Receiver<ConsumerState>,
        service_name: &str,
    ) -> Self {
        Self {
            query: QueryService::new(Arc::clone(&store)),
            store,
            consumer_state,
            service_name: Arc::from(service_name),
        }
    }
}
