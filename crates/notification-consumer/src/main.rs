//! 通知消费服务
//!
//! 消费 Kafka 通知 topic 写入进程内存储，并提供按收件人查询的 REST API。

use std::future::IntoFuture;
use std::sync::Arc;

use notification_consumer::{
    consumer::NotificationClaimHandler,
    routes,
    state::AppState,
    store::NotificationStore,
    supervisor::{ConsumerGroupSupervisor, ConsumerState},
};
use notify_shared::{
    config::AppConfig,
    consumer_group::{ClaimHandler, KafkaConsumerGroup},
    observability,
    retry::RetryPolicy,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "notification-consumer";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        brokers = %config.kafka.brokers,
        group_id = %config.kafka.consumer_group,
        topic = %config.kafka.topic,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    let store = Arc::new(NotificationStore::new());
    let (state_tx, state_rx) = ConsumerState::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumer_task = tokio::spawn(run_consumer(
        config.clone(),
        Arc::clone(&store),
        state_tx,
        shutdown_rx.clone(),
    ));

    let app = routes::app(AppState::new(store, state_rx, &config.service_name));
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .into_future(),
    );

    // 消费任务提前结束说明客户端创建失败或重试耗尽，整个进程随之退出
    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut consumer_task => Some(joined),
    };

    shutdown_tx.send_replace(true);

    let consumer_result = match early_exit {
        Some(joined) => joined,
        None => consumer_task.await,
    };

    if let Err(e) = server.await? {
        error!(error = %e, "HTTP 服务异常退出");
    }

    consumer_result??;
    info!("Server shutdown complete");

    Ok(())
}

/// 创建消费组客户端并运行监督循环
///
/// 客户端创建失败直接返回错误，不进入重试。
async fn run_consumer(
    config: AppConfig,
    store: Arc<NotificationStore>,
    state: watch::Sender<ConsumerState>,
    shutdown: watch::Receiver<bool>,
) -> notify_shared::error::Result<()> {
    let group = KafkaConsumerGroup::join(&config.kafka)
        .await
        .inspect_err(|e| error!(error = %e, brokers = %config.kafka.brokers, "创建消费组客户端失败"))?;

    let handler: Arc<dyn ClaimHandler> = Arc::new(NotificationClaimHandler::new(store));
    let supervisor = ConsumerGroupSupervisor::new(
        group,
        vec![config.kafka.topic.clone()],
        handler,
        RetryPolicy::from(&config.retry),
        state,
    );

    supervisor.run(shutdown).await
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
