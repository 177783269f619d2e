//! 通知消费服务
//!
//! 以消费组成员身份订阅 Kafka 通知 topic，把每条消息解码后追加到
//! 按收件人划分的进程内存储，并通过 HTTP 按收件人 ID 提供查询。
//! 消费会话出错时自动重新进入，不影响查询服务。

pub mod consumer;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod supervisor;
