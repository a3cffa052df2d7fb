//! HTTP routes of the orchestrator service.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dicesim_core::{Orchestrator, OrchestratorError, Trigger};
use dicesim_env::{InvocationTransport, TokioEnvironment};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Shared state for orchestrator handlers.
pub struct ApiState<T: InvocationTransport> {
    pub orchestrator: Arc<Orchestrator<T, TokioEnvironment>>,
}

impl<T: InvocationTransport> ApiState<T> {
    pub fn new(orchestrator: Arc<Orchestrator<T, TokioEnvironment>>) -> Self {
        Self { orchestrator }
    }
}

impl<T: InvocationTransport> Clone for ApiState<T> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
        }
    }
}

/// Error body returned by the orchestrator API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Orchestrator failure rendered as an HTTP response.
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            OrchestratorError::InvalidTrigger => StatusCode::BAD_REQUEST,
            OrchestratorError::NotStarted | OrchestratorError::AlreadyRunning(_) => {
                StatusCode::CONFLICT
            }
            OrchestratorError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::Routing { .. } | OrchestratorError::Transport { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the router for the orchestrator service.
pub fn create_router<T: InvocationTransport>(state: ApiState<T>) -> Router {
    Router::new()
        .route("/start", get(start_handler::<T>).post(start_handler::<T>))
        .route("/step", get(step_handler::<T>).post(step_handler::<T>))
        .route("/stop", post(stop_handler::<T>))
        .route("/status", get(status_handler::<T>))
        .route("/history", get(history_handler::<T>))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

fn trigger(origin: &str, body: Bytes) -> Option<Trigger> {
    Some(Trigger::new(origin).with_data(body.to_vec()))
}

async fn start_handler<T: InvocationTransport>(
    State(state): State<ApiState<T>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.start(trigger("/start", body)).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

async fn step_handler<T: InvocationTransport>(
    State(state): State<ApiState<T>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.step(trigger("/step", body)).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(err) => {
            warn!(error = %err, "Step request failed");
            Err(err.into())
        }
    }
}

async fn stop_handler<T: InvocationTransport>(
    State(state): State<ApiState<T>>,
) -> impl IntoResponse {
    state.orchestrator.request_stop();
    (StatusCode::ACCEPTED, Json(state.orchestrator.status()))
}

async fn status_handler<T: InvocationTransport>(
    State(state): State<ApiState<T>>,
) -> impl IntoResponse {
    Json(state.orchestrator.status())
}

async fn history_handler<T: InvocationTransport>(
    State(state): State<ApiState<T>>,
) -> impl IntoResponse {
    Json(state.orchestrator.history().await)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use dicesim_core::{
        CoinFactory, DieFactory, EntityDirectory, LocalRouter, OrchestratorConfig, RunState,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn state(auto_step: bool, end_steps: u64) -> ApiState<LocalRouter<TokioEnvironment>> {
        let env = TokioEnvironment::shared(99);
        let dice = Arc::new(
            EntityDirectory::new("dice-host", env.clone()).with_factory(DieFactory::new(6).unwrap()),
        );
        let coins = Arc::new(EntityDirectory::new("coin-host", env.clone()).with_factory(CoinFactory));
        let router = Arc::new(LocalRouter::new().with_directory(dice).with_directory(coins));
        let config = OrchestratorConfig {
            auto_step,
            entity_count: 1,
            end_steps,
            ..Default::default()
        };
        ApiState::new(Arc::new(Orchestrator::new(config, router, env).unwrap()))
    }

    async fn call(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_step_before_start_conflicts() {
        let router = create_router(state(false, 3));
        let (status, body) = call(&router, Method::GET, "/step").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("not been started"));
    }

    #[tokio::test]
    async fn test_manual_run_over_http() {
        let router = create_router(state(false, 2));

        let (status, body) = call(&router, Method::POST, "/start").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "awaiting_step");

        let (_, body) = call(&router, Method::GET, "/step").await;
        assert_eq!(body["outcome"], "advanced");
        let (_, body) = call(&router, Method::GET, "/step").await;
        assert_eq!(body["outcome"], "completed");
        let (_, body) = call(&router, Method::GET, "/step").await;
        assert_eq!(body["outcome"], "already_complete");

        let (status, body) = call(&router, Method::GET, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "complete");
        assert_eq!(body["steps_taken"], 2);

        let (_, body) = call(&router, Method::GET, "/history").await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_auto_step_start() {
        let state = state(true, 5);
        let orchestrator = state.orchestrator.clone();
        let router = create_router(state);

        let (status, body) = call(&router, Method::GET, "/start").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "auto_stepping");

        let status = orchestrator
            .wait_for(|s| s.state == RunState::Complete && !s.auto_stepping)
            .await;
        assert_eq!(status.steps_taken, 5);
    }

    #[tokio::test]
    async fn test_stop_and_health() {
        let router = create_router(state(true, 3));
        let (status, body) = call(&router, Method::POST, "/stop").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["state"], "idle");

        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError(OrchestratorError::InvalidTrigger).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(OrchestratorError::AlreadyRunning("run".into())).status(),
            StatusCode::CONFLICT
        );
        let routing = OrchestratorError::entity_failure(
            1,
            dicesim_env::EntityAddress::new("coinActorType", "coin0"),
            dicesim_env::EnvError::unroutable("coinActorType/coin0"),
        );
        assert_eq!(ApiError(routing).status(), StatusCode::BAD_GATEWAY);
    }
}
