//! 路由配置模块

use axum::{Router, middleware, routing::get};
use notify_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 构建完整的 HTTP 应用
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/notifications", get(handlers::missing_recipient))
        .route("/notifications/", get(handlers::missing_recipient))
        .route("/notifications/{user_id}", get(handlers::get_notifications))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // 挂在路由层，指标按路由模板打标签
        .route_layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationRecord, Participant};
    use crate::store::NotificationStore;
    use crate::supervisor::ConsumerState;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<NotificationStore>, watch::Sender<ConsumerState>) {
        let store = Arc::new(NotificationStore::new());
        let (state_tx, state_rx) = ConsumerState::channel();
        let state = AppState::new(Arc::clone(&store), state_rx, "notification-consumer");
        (app(state), store, state_tx)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_missing_recipient_is_404() {
        for uri in ["/notifications", "/notifications/"] {
            let (app, _, _) = test_app();
            let (status, body) = get_json(app, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body, json!({"message": "no messages found"}));
        }
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_empty_200() {
        let (app, _, _) = test_app();
        let (status, body) = get_json(app, "/notifications/alice").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "No notifications found", "notifications": []}));
    }

    #[tokio::test]
    async fn test_whitespace_recipient_is_not_trimmed() {
        let (app, store, _) = test_app();
        store.add(
            " bob",
            NotificationRecord::new(
                Participant { id: 1, name: "Emma".to_string() },
                Participant { id: 2, name: "Bruno".to_string() },
                "padded key",
            ),
        );

        let (status, body) = get_json(app.clone(), "/notifications/%20").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "No notifications found", "notifications": []}));

        let (status, body) = get_json(app, "/notifications/%20bob").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notifications"][0]["message"], "padded key");
    }

    #[tokio::test]
    async fn test_known_recipient_lists_notifications() {
        let (app, store, _) = test_app();
        store.add(
            "bob",
            NotificationRecord::new(
                Participant { id: 1, name: "Emma".to_string() },
                Participant { id: 2, name: "Bruno".to_string() },
                "Emma started following you",
            ),
        );

        let (status, body) = get_json(app, "/notifications/bob").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"notifications": [{
                "from": {"id": 1, "name": "Emma"},
                "to": {"id": 2, "name": "Bruno"},
                "message": "Emma started following you"
            }]})
        );
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _) = test_app();
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "service": "notification-consumer"}));
    }

    #[tokio::test]
    async fn test_ready_follows_consumer_state() {
        let (app, _, state_tx) = test_app();
        let (status, body) = get_json(app.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["consumer"], "initializing");

        state_tx.send_replace(ConsumerState::Consuming);
        let (_, body) = get_json(app, "/ready").await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["consumer"], "consuming");
        assert_eq!(body["recipients"], 0);
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let (app, _, _) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key(obs_middleware::REQUEST_ID_HEADER));
    }
}
