//! Administrative HTTP surface of a stage process.
//!
//! # Endpoints
//!
//! ```text
//! GET  /health     liveness, always 200 while the process serves requests
//! POST /shutdown   request a graceful shutdown
//! GET  /metrics    Prometheus text exposition
//! POST /orders     submit an order (intake process only)
//! ```

use crate::config::Stage;
use crate::error::StageError;
use crate::intake::OrderIntake;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fulfillment_core::order::Order;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// The stage this process runs
    pub stage: Stage,
    /// Process-wide shutdown flag
    pub shutdown: Arc<watch::Sender<bool>>,
    /// Exporter handle; `None` when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Order intake; `None` on every stage but intake
    pub intake: Option<Arc<OrderIntake>>,
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .route("/metrics", get(metrics))
        .route("/orders", post(submit_order))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    stage: Stage,
    version: &'static str,
}

#[allow(clippy::unused_async)]
async fn health(State(state): State<AdminState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        stage: state.stage,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[allow(clippy::unused_async)]
async fn shutdown(State(state): State<AdminState>) -> StatusCode {
    tracing::info!(stage = %state.stage, "Shutdown requested over HTTP");
    state.shutdown.send_replace(true);
    StatusCode::ACCEPTED
}

#[allow(clippy::unused_async)]
async fn metrics(State(state): State<AdminState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => AdminError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "METRICS_UNAVAILABLE",
            "No metrics recorder installed",
        )
        .into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    event_id: String,
}

async fn submit_order(
    State(state): State<AdminState>,
    Json(order): Json<Order>,
) -> Result<(StatusCode, Json<Accepted>), AdminError> {
    let Some(intake) = state.intake else {
        return Err(AdminError::new(
            StatusCode::NOT_FOUND,
            "NOT_INTAKE",
            format!("Stage {} does not accept orders", state.stage),
        ));
    };

    let event = intake.submit(&order).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            event_id: event.event_id,
        }),
    ))
}

/// Error response of an admin handler.
#[derive(Debug)]
struct AdminError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AdminError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<StageError> for AdminError {
    fn from(err: StageError) -> Self {
        let (status, code) = match &err {
            StageError::InvalidOrder(_) | StageError::Decode(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_ORDER")
            }
            StageError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE_ORDER"),
            StageError::Publish(_)
            | StageError::EscalationFailed { .. }
            | StageError::InvalidTimestamp { .. } => (StatusCode::BAD_GATEWAY, "PUBLISH_FAILED"),
        };
        Self::new(status, code, err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, code = self.code, message = %self.message, "Admin request failed");
        }
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use fulfillment_runtime::Producer;
    use fulfillment_testing::{InMemoryEventBus, RecordingSink, helpers};
    use tower::ServiceExt;

    fn state(stage: Stage, bus: Option<&InMemoryEventBus>) -> (AdminState, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let intake = bus.map(|bus| {
            let bus: Arc<InMemoryEventBus> = Arc::new(bus.clone());
            Arc::new(OrderIntake::new(
                Producer::new(bus.clone(), "received"),
                Producer::new(bus, "errors"),
                Arc::new(RecordingSink::new()),
            ))
        });
        let state = AdminState {
            stage,
            shutdown: Arc::new(tx),
            metrics: None,
            intake,
        };
        (state, rx)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_order(order: &Order) -> Request<Body> {
        Request::post("/orders")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(order).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_stage() {
        let (state, _rx) = state(Stage::Inventory, None);

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["stage"], "inventory");
    }

    #[tokio::test]
    async fn shutdown_flips_the_flag() {
        let (state, rx) = state(Stage::Warehouse, None);

        let response = router(state)
            .oneshot(Request::post("/shutdown").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_unavailable() {
        let (state, _rx) = state(Stage::ErrorCounter, None);

        let response = router(state)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn orders_are_accepted_then_conflict() {
        let bus = InMemoryEventBus::new();
        let (state, _rx) = state(Stage::Intake, Some(&bus));
        let app = router(state);

        let first = app.clone().oneshot(post_order(&helpers::order("A1"))).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let json = body_json(first).await;
        assert_eq!(json["eventId"], bus.published("received")[0].event_id);

        let second = app.oneshot(post_order(&helpers::order("A1"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(second).await["code"], "DUPLICATE_ORDER");
    }

    #[tokio::test]
    async fn invalid_order_is_a_bad_request() {
        let bus = InMemoryEventBus::new();
        let (state, _rx) = state(Stage::Intake, Some(&bus));
        let mut order = helpers::order("A1");
        order.total_amount = -1.0;

        let response = router(state).oneshot(post_order(&order)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bus.message_count("received"), 0);
    }

    #[tokio::test]
    async fn broker_failure_is_a_bad_gateway() {
        let bus = InMemoryEventBus::new();
        bus.fail_topic("received");
        let (state, _rx) = state(Stage::Intake, Some(&bus));

        let response = router(state)
            .oneshot(post_order(&helpers::order("A1")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn orders_on_other_stages_are_not_found() {
        let (state, _rx) = state(Stage::Inventory, None);

        let response = router(state)
            .oneshot(post_order(&helpers::order("A1")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
