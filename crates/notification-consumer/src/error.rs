//! 通知消费服务错误类型
//!
//! 区分查询侧的客户端输入错误与消费侧的单条消息错误。
//! 消费侧错误只在 claim 内部记录并跳过，不会越过组件边界。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// 查询未携带收件人 ID
    #[error("no messages found")]
    RecipientMissing,

    #[error("消息缺少收件人 key: topic={topic}, partition={partition}, offset={offset}")]
    MissingKey {
        topic: String,
        partition: i32,
        offset: i64,
    },

    #[error("通知反序列化失败: {0}")]
    DeserializationFailed(String),
}

impl ConsumerError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RecipientMissing => StatusCode::NOT_FOUND,
            Self::MissingKey { .. } | Self::DeserializationFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 指标标签使用的跳过原因
    pub fn skip_reason(&self) -> &'static str {
        match self {
            Self::MissingKey { .. } => "missing_key",
            Self::DeserializationFailed(_) => "invalid_payload",
            Self::RecipientMissing => "other",
        }
    }
}

impl IntoResponse for ConsumerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 服务端错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::RecipientMissing => self.to_string(),
            other => {
                tracing::error!(error = %other, "查询处理失败");
                "internal server error".to_string()
            }
        };

        (status, axum::Json(json!({ "message": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
