//! HITL suspension protocol over the HTTP surface: approve round-trip and
//! expiry with an implicit policy.

use async_trait::async_trait;
use axum::body::Body;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;
use tutti_hitl::api;
use tutti_hitl::controller::{InterruptController, InterruptPolicy};
use tutti_hitl::expiry::{ExpiryCallback, ExpiryProcessor, expired_status};
use tutti_hitl::service::HitlService;
use tutti_hitl::store::InMemoryCheckpointStore;
use tutti_kernel::checkpoint::{
    CheckpointStatus, CheckpointStore, ExecutionCheckpoint, InterruptPoint,
};
use tutti_kernel::config::{
    ExpiryConfig, HitlConfig, OrchestratorConfig, TimeoutPolicy,
};
use tutti_kernel::context::ExecutionContext;
use tutti_kernel::plan::{RoutingPlan, RoutingStep};
use tutti_runtime::orchestrator::Orchestrator;
use tutti_testing::{MockLLMProvider, catalog_of, fixed_response_component, number_param};

/// Interrupt only fund-moving capabilities.
struct PaymentsOnly;

impl InterruptPolicy for PaymentsOnly {
    fn should_interrupt(
        &self,
        _point: InterruptPoint,
        _plan: &RoutingPlan,
        step: Option<&RoutingStep>,
    ) -> bool {
        step.map(|s| s.metadata.capability == "transfer").unwrap_or(false)
    }
}

fn hitl_config() -> HitlConfig {
    HitlConfig {
        enabled: true,
        interrupt_points: [InterruptPoint::BeforeStep].into_iter().collect(),
        wait_window: Duration::from_secs(60),
        webhook_url: None,
        expiry: ExpiryConfig::default(),
    }
}

#[tokio::test]
async fn approve_round_trip_over_http() {
    let balance = fixed_response_component(
        "ledger",
        "get_balance",
        vec![],
        json!({"balance": 250.0, "currency": "EUR"}),
    )
    .await;
    let payments = fixed_response_component(
        "payments",
        "transfer",
        vec![number_param("amount")],
        json!({"status": "sent"}),
    )
    .await;
    let catalog = catalog_of(&[&balance, &payments]).await;

    let plan = json!({
        "steps": [
            {"step_id": "s1", "component_name": "ledger",
             "metadata": {"capability": "get_balance", "parameters": {}}},
            {"step_id": "s2", "component_name": "payments", "depends_on": ["s1"],
             "instruction": "pay the landlord",
             "metadata": {"capability": "transfer", "parameters": {"amount": 100}}}
        ]
    })
    .to_string();

    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let controller = Arc::new(
        InterruptController::new(store.clone(), hitl_config())
            .with_policy(Arc::new(PaymentsOnly)),
    );
    let provider = Arc::new(MockLLMProvider::new(vec![plan]));
    let orchestrator = Arc::new(
        Orchestrator::new(catalog.clone(), provider, OrchestratorConfig::default())
            .unwrap()
            .with_gate(controller.clone()),
    );
    let service = Arc::new(HitlService::new(
        store.clone(),
        controller,
        orchestrator.clone(),
        catalog,
    ));
    let app = api::router(service.clone());

    // Initial request suspends before the transfer step.
    let ctx = ExecutionContext::new("req-hitl");
    let response = orchestrator.process(&ctx, "pay my rent").await.unwrap();
    assert!(response.result.interrupted);
    assert!(response.answer.is_none());
    assert_eq!(balance.hits(), 1, "s1 ran before the suspension");
    assert_eq!(payments.hits(), 0, "transfer must wait for approval");

    let pending = service.list_pending(Some("req-hitl"), 10, 0).await.unwrap();
    assert_eq!(pending.len(), 1);
    let checkpoint_id = pending[0].checkpoint_id.clone();
    assert_eq!(pending[0].current_step.as_deref(), Some("s2"));

    // Phase one: approve over HTTP.
    let request = axum::http::Request::post("/hitl/command")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"checkpoint_id": checkpoint_id, "type": "approve"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let outcome: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(outcome["should_resume"], json!(true));

    // Phase two: resume runs the remaining steps.
    let request = axum::http::Request::post(format!("/hitl/resume/{checkpoint_id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let result: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["steps"].as_array().unwrap().len(), 2);

    assert_eq!(payments.hits(), 1, "transfer ran exactly once after approval");
    assert_eq!(balance.hits(), 1, "completed step must not re-run");

    let checkpoint = service.get_checkpoint(&checkpoint_id).await.unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
}

struct CaptureExpiry {
    statuses: Arc<std::sync::Mutex<Vec<CheckpointStatus>>>,
    calls: AtomicUsize,
}

#[async_trait]
impl ExpiryCallback for CaptureExpiry {
    async fn on_expired(&self, _checkpoint: ExecutionCheckpoint, status: CheckpointStatus) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statuses.lock().unwrap().push(status);
    }
}

#[tokio::test]
async fn expiry_with_implicit_reject() {
    let store = Arc::new(InMemoryCheckpointStore::new());

    // Checkpoint with a one-second wait window.
    let checkpoint = ExecutionCheckpoint::new(
        "req-expire",
        InterruptPoint::BeforeStep,
        RoutingPlan::new("pay my rent"),
        Duration::from_secs(1),
    );
    store.put(&checkpoint, Duration::from_secs(60)).await.unwrap();

    let statuses = Arc::new(std::sync::Mutex::new(Vec::new()));
    let callback = Arc::new(CaptureExpiry {
        statuses: statuses.clone(),
        calls: AtomicUsize::new(0),
    });

    let config = ExpiryConfig {
        scan_interval: Duration::from_secs(1),
        timeout_policy: TimeoutPolicy::ImplicitReject,
        ..Default::default()
    };
    let processor = Arc::new(
        ExpiryProcessor::new(store.clone(), config).with_callback(callback.clone()),
    );

    // Not yet due.
    let stats = processor.sweep().await.unwrap();
    assert_eq!(stats.transitioned, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stats = processor.sweep().await.unwrap();
    assert_eq!(stats.transitioned, 1);

    let stored = store.get(&checkpoint.checkpoint_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CheckpointStatus::ExpiredRejected);
    assert!(stored.status.is_terminal());

    // The callback is where the user-facing timeout response is produced.
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(statuses.lock().unwrap()[0], CheckpointStatus::ExpiredRejected);
    assert_eq!(
        expired_status(TimeoutPolicy::ImplicitReject),
        CheckpointStatus::ExpiredRejected
    );
}
