//! HTTP 处理器
//!
//! 通知查询与存活/就绪探针。

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{ConsumerError, Result};
use crate::service::NotificationsResponse;
use crate::state::AppState;
use crate::supervisor::ConsumerState;

/// 查询收件人的通知
///
/// GET /notifications/{user_id}
#[instrument(skip(state))]
pub async fn get_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<NotificationsResponse>> {
    let response = state.query.handle_query(&user_id)?;
    Ok(Json(response))
}

/// 未携带收件人 ID
///
/// GET /notifications 与 GET /notifications/
pub async fn missing_recipient() -> ConsumerError {
    ConsumerError::RecipientMissing
}

/// 存活探针：服务进程正常即返回 ok
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": &*state.service_name,
    }))
}

/// 就绪探针：只有消费会话进行中才报告 ok
///
/// 消费者重连期间查询仍可正常服务，因此始终返回 200，由 status 字段区分。
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let consumer = *state.consumer_state.borrow();
    let ready = consumer == ConsumerState::Consuming;

    Json(json!({
        "status": if ready { "ok" } else { "degraded" },
        "service": &*state.service_name,
        "consumer": consumer,
        "recipients": state.store.recipient_count(),
    }))
}
