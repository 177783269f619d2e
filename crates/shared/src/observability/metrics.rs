//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "notifications_consumed_total",
        "Notifications decoded and appended to the store"
    );
    metrics::describe_counter!(
        "notification_decode_failures_total",
        "Messages skipped because they could not be decoded"
    );
    metrics::describe_counter!(
        "consume_errors_total",
        "Consumer group sessions that ended with an error"
    );
    metrics::describe_counter!(
        "consumer_group_sessions_total",
        "Consumer group sessions started"
    );
    metrics::describe_gauge!(
        "notification_store_recipients",
        "Distinct recipients held in the notification store"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一条成功写入存储的通知
#[inline]
pub fn record_notification_consumed(topic: &str, partition: i32) {
    metrics::counter!(
        "notifications_consumed_total",
        "topic" => topic.to_string(),
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// 记录被跳过的消息，reason 如 "invalid_payload"、"missing_key"
#[inline]
pub fn record_decode_failure(topic: &str, reason: &str) {
    metrics::counter!(
        "notification_decode_failures_total",
        "topic" => topic.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录消费会话开始
#[inline]
pub fn record_session_started(group_id: &str) {
    metrics::counter!(
        "consumer_group_sessions_total",
        "group_id" => group_id.to_string()
    )
    .increment(1);
}

/// 记录以错误结束的消费会话
#[inline]
pub fn record_consume_error(group_id: &str, code: &str) {
    metrics::counter!(
        "consume_errors_total",
        "group_id" => group_id.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

/// 更新存储中的收件人数量
#[inline]
pub fn set_store_recipients(count: usize) {
    metrics::gauge!("notification_store_recipients").set(count as f64);
}
