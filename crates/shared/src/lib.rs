//! 共享库
//!
//! 包含通知服务共用的配置、错误处理、Kafka 消费组、重试退避与可观测性等基础设施代码。

pub mod config;
pub mod consumer_group;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
