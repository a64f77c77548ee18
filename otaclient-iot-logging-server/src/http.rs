//! The HTTP ingress. One route, `POST /{ecu_id}`.

use crate::queue::QueueSender;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use otaclient_iot_logging_core::identity::AllowedEcus;
use otaclient_iot_logging_core::{GroupType, LogMessage, QueueRecord};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct HttpState {
    pub queue: QueueSender,
    pub allowed_ecus: AllowedEcus,
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/{ecu_id}", post(put_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn put_log(
    State(state): State<Arc<HttpState>>,
    Path(ecu_id): Path<String>,
    body: String,
) -> StatusCode {
    if body.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    if !state.allowed_ecus.is_allowed(&ecu_id) {
        return StatusCode::BAD_REQUEST;
    }

    let message = LogMessage::new(LogMessage::now_ms(), body);
    let record = QueueRecord::new(GroupType::Log, ecu_id, message);

    match state.queue.try_enqueue(record) {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::bounded_queue;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(allowed: AllowedEcus) -> (Arc<HttpState>, crate::queue::QueueReceiver) {
        let (tx, rx) = bounded_queue(4);
        (
            Arc::new(HttpState {
                queue: tx,
                allowed_ecus: allowed,
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn happy_path_enqueues_and_returns_200() {
        let (state, mut rx) = state(AllowedEcus::Unfiltered);
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/main")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let drained = rx.drain_up_to(1);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].stream_suffix, "main");
        assert_eq!(drained[0].message.message, "hello");
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let (state, _rx) = state(AllowedEcus::Unfiltered);
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/main")
                    .body(Body::from(""))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disallowed_ecu_is_rejected_without_enqueue() {
        let allowed = AllowedEcus::Filtered(["main".to_string()].into_iter().collect());
        let (state, mut rx) = state(allowed);
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/bad")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rx.drain_up_to(10).len(), 0);
    }

    #[tokio::test]
    async fn queue_full_returns_503() {
        let (state, _rx) = state(AllowedEcus::Unfiltered);
        // Fill the queue's capacity (4) without draining.
        for _ in 0..4 {
            let _ = state.queue.try_enqueue(QueueRecord::new(
                GroupType::Log,
                "main",
                LogMessage::new(1, "filler"),
            ));
        }
        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/main")
                    .body(Body::from("overflow"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
