//! HITL HTTP surface.
//!
//! - `POST /hitl/command` — accept a human command, fast.
//! - `POST /hitl/resume/{checkpoint_id}` — run the resumed DAG, slow.
//! - `GET  /hitl/checkpoints?request_id=&limit=&offset=` — pending list.
//! - `GET  /hitl/checkpoints/{id}` — full checkpoint record.

use crate::command::CommandRequest;
use crate::service::HitlService;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, body::Body};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tutti_kernel::error::OrchestratorError;

pub fn router(service: Arc<HitlService>) -> Router {
    Router::new()
        .route("/hitl/command", post(post_command))
        .route("/hitl/resume/{checkpoint_id}", post(post_resume))
        .route("/hitl/checkpoints", get(list_checkpoints))
        .route("/hitl/checkpoints/{checkpoint_id}", get(get_checkpoint))
        .with_state(service)
}

fn error_response(error: OrchestratorError) -> Response {
    let status = match &error {
        OrchestratorError::InvalidCommand(_) | OrchestratorError::PlanInvalid(_) => {
            StatusCode::BAD_REQUEST
        }
        OrchestratorError::CheckpointNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::CheckpointExpired(_) => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string()}))).into_response()
}

async fn post_command(
    State(service): State<Arc<HitlService>>,
    Json(request): Json<CommandRequest>,
) -> Response {
    match service.ingest_command(request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(error) => error_response(error),
    }
}

async fn post_resume(
    State(service): State<Arc<HitlService>>,
    Path(checkpoint_id): Path<String>,
) -> Response {
    match service.resume(&checkpoint_id).await {
        Ok(response) => Json(response.result).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    request_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_checkpoints(
    State(service): State<Arc<HitlService>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).min(1_000);
    let offset = query.offset.unwrap_or(0);
    match service
        .list_pending(query.request_id.as_deref(), limit, offset)
        .await
    {
        Ok(checkpoints) => Json(json!({"checkpoints": checkpoints})).into_response(),
        Err(error) => error_response(error),
    }
}

async fn get_checkpoint(
    State(service): State<Arc<HitlService>>,
    Path(checkpoint_id): Path<String>,
) -> Response {
    match service.get_checkpoint(&checkpoint_id).await {
        Ok(checkpoint) => Json(checkpoint).into_response(),
        Err(error) => error_response(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::InterruptController;
    use crate::store::InMemoryCheckpointStore;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use tutti_kernel::checkpoint::{CheckpointStore, ExecutionCheckpoint, InterruptPoint};
    use tutti_kernel::config::{HitlConfig, OrchestratorConfig};
    use tutti_kernel::error::OrchestratorResult;
    use tutti_kernel::llm::{Completion, CompletionRequest, LLMProvider};
    use tutti_kernel::plan::RoutingPlan;
    use tutti_runtime::catalog::ComponentCatalog;
    use tutti_runtime::orchestrator::Orchestrator;

    struct NullProvider;

    #[async_trait::async_trait]
    impl LLMProvider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }

        async fn generate(
            &self,
            _request: CompletionRequest,
        ) -> OrchestratorResult<Completion> {
            Ok(Completion {
                content: "{}".into(),
                model: "null".into(),
                provider: "null".into(),
                usage: None,
            })
        }
    }

    async fn test_router() -> (Router, String) {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let catalog = Arc::new(ComponentCatalog::new());
        let controller = Arc::new(InterruptController::new(
            store.clone(),
            HitlConfig::default(),
        ));
        let orchestrator = Arc::new(
            Orchestrator::new(
                catalog.clone(),
                Arc::new(NullProvider),
                OrchestratorConfig::default(),
            )
            .unwrap(),
        );
        let service = Arc::new(HitlService::new(
            store.clone(),
            controller,
            orchestrator,
            catalog,
        ));

        let checkpoint = ExecutionCheckpoint::new(
            "req-1",
            InterruptPoint::BeforeStep,
            RoutingPlan::new("q"),
            Duration::from_secs(60),
        );
        store
            .put(&checkpoint, Duration::from_secs(60))
            .await
            .unwrap();

        (router(service), checkpoint.checkpoint_id)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_command_approve_http() {
        let (app, checkpoint_id) = test_router().await;

        let request = axum::http::Request::post("/hitl/command")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"checkpoint_id": checkpoint_id, "type": "approve"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["should_resume"], json!(true));
        assert_eq!(body["checkpoint"]["status"], json!("approved"));
    }

    #[tokio::test]
    async fn test_command_unknown_checkpoint_404() {
        let (app, _) = test_router().await;

        let request = axum::http::Request::post("/hitl/command")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"checkpoint_id": "ghost", "type": "approve"}).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resume_not_resumable_400() {
        let (app, checkpoint_id) = test_router().await;

        // Still pending — resume must be rejected.
        let request = axum::http::Request::post(format!("/hitl/resume/{checkpoint_id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_get_checkpoints() {
        let (app, checkpoint_id) = test_router().await;

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::get("/hitl/checkpoints?request_id=req-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["checkpoints"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(
                axum::http::Request::get(format!("/hitl/checkpoints/{checkpoint_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["checkpoint_id"], json!(checkpoint_id));
    }
}
