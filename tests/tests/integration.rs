//! End-to-end engine tests: planning, parameter binding, and scheduling
//! against real mock component listeners.

use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tutti_kernel::component::{Capability, Component};
use tutti_kernel::config::OrchestratorConfig;
use tutti_kernel::context::ExecutionContext;
use tutti_runtime::catalog::ComponentCatalog;
use tutti_runtime::orchestrator::Orchestrator;
use tutti_testing::{MockLLMProvider, catalog_of, fixed_response_component, number_param, serve};

fn weather_plan_json() -> String {
    json!({
        "steps": [{
            "step_id": "s1",
            "component_name": "weather-service",
            "instruction": "weather for Paris",
            "depends_on": [],
            "metadata": {
                "capability": "get_weather",
                "parameters": {"lat": "48.8566", "lon": "2.3522"}
            }
        }]
    })
    .to_string()
}

/// Capability `get_weather(lat: number, lon: number)` receiving string
/// inputs must see a numeric outbound body after coercion.
#[tokio::test]
async fn coercion_end_to_end() {
    let bad_bodies = Arc::new(AtomicUsize::new(0));
    let bad_clone = bad_bodies.clone();
    let router = Router::new().route(
        "/api/capabilities/get_weather",
        post(move |Json(body): Json<Value>| {
            let bad = bad_clone.clone();
            async move {
                if !body["lat"].is_f64() || !body["lon"].is_f64() {
                    bad.fetch_add(1, Ordering::SeqCst);
                    return (axum::http::StatusCode::BAD_REQUEST, "expected number".to_string())
                        .into_response();
                }
                Json(json!({"temp": 21.5, "lat": body["lat"], "lon": body["lon"]}))
                    .into_response()
            }
        }),
    );
    let addr = serve(router).await;

    let catalog = ComponentCatalog::new();
    catalog
        .register(
            Component::new("w1", "weather-service", addr.ip().to_string(), addr.port())
                .with_capability(
                    Capability::new("get_weather")
                        .with_parameter(number_param("lat"))
                        .with_parameter(number_param("lon")),
                ),
        )
        .await
        .unwrap();

    let provider = Arc::new(MockLLMProvider::new(vec![weather_plan_json()]));
    let orchestrator = Orchestrator::new(
        Arc::new(catalog),
        provider,
        OrchestratorConfig::default(),
    )
    .unwrap();

    let ctx = ExecutionContext::new("req-coerce");
    let response = orchestrator
        .process(&ctx, "what is the weather in Paris?")
        .await
        .unwrap();

    assert!(response.result.success, "errors: {:?}", response.result.errors);
    assert_eq!(bad_bodies.load(Ordering::SeqCst), 0, "body must arrive numeric");
    assert_eq!(
        response.result.steps[0].response_json().unwrap()["lat"],
        json!(48.8566)
    );
}

/// s1 and s2 run concurrently; s3 starts only after both complete; total
/// wall-clock ≈ max(s1, s2) + s3.
#[tokio::test]
async fn dependency_fan_out() {
    const STEP_MS: u64 = 90;
    let order = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let order_clone = order.clone();
    let router = Router::new().route(
        "/api/capabilities/work",
        post(move |Json(body): Json<Value>| {
            let order = order_clone.clone();
            async move {
                let tag = body["tag"].as_str().unwrap_or("?").to_string();
                order.lock().unwrap().push(format!("start:{tag}"));
                tokio::time::sleep(Duration::from_millis(STEP_MS)).await;
                order.lock().unwrap().push(format!("end:{tag}"));
                Json(json!({"tag": tag}))
            }
        }),
    );
    let addr = serve(router).await;

    let catalog = ComponentCatalog::new();
    catalog
        .register(
            Component::new("c1", "worker", addr.ip().to_string(), addr.port())
                .with_capability(Capability::new("work")),
        )
        .await
        .unwrap();

    let plan = json!({
        "steps": [
            {"step_id": "s1", "component_name": "worker",
             "metadata": {"capability": "work", "parameters": {"tag": "s1"}}},
            {"step_id": "s2", "component_name": "worker",
             "metadata": {"capability": "work", "parameters": {"tag": "s2"}}},
            {"step_id": "s3", "component_name": "worker", "depends_on": ["s1", "s2"],
             "metadata": {"capability": "work", "parameters": {"tag": "s3"}}}
        ]
    })
    .to_string();

    let provider = Arc::new(MockLLMProvider::new(vec![plan]));
    let orchestrator = Orchestrator::new(
        Arc::new(catalog),
        provider,
        OrchestratorConfig::default(),
    )
    .unwrap();

    let ctx = ExecutionContext::new("req-fanout");
    let started = Instant::now();
    let response = orchestrator.process(&ctx, "fan out").await.unwrap();
    let elapsed = started.elapsed();

    assert!(response.result.success);
    assert!(
        elapsed < Duration::from_millis(3 * STEP_MS),
        "expected ≈ max(s1,s2)+s3, got {elapsed:?}"
    );

    let events = order.lock().unwrap().clone();
    let position = |event: &str| events.iter().position(|e| e == event).unwrap();
    assert!(position("start:s3") > position("end:s1"));
    assert!(position("start:s3") > position("end:s2"));
}

/// First model reply contains arithmetic; the retry prompt carries the
/// parse error and the corrected reply executes.
#[tokio::test]
async fn plan_parse_retry_round_trip() {
    let weather = fixed_response_component(
        "weather-service",
        "get_weather",
        vec![number_param("lat"), number_param("lon")],
        json!({"temp": 3.0}),
    )
    .await;

    let bad_plan = r#"{"steps": [{"step_id": "s1", "component_name": "weather-service",
        "metadata": {"capability": "get_weather", "parameters": {"amount": 100 * price}}}]}"#;
    let provider = Arc::new(MockLLMProvider::new(vec![
        bad_plan.to_string(),
        weather_plan_json(),
    ]));

    let orchestrator = Orchestrator::new(
        catalog_of(&[&weather]).await,
        provider.clone(),
        OrchestratorConfig::default(),
    )
    .unwrap();

    let ctx = ExecutionContext::new("req-parse-retry");
    let response = orchestrator.process(&ctx, "weather please").await.unwrap();

    assert!(response.result.success);
    assert_eq!(weather.hits(), 1);

    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Parse Error:"), "retry prompt must carry the error");
    assert!(prompts[1].contains("NO arithmetic"));
}

/// Auto-wiring leaves a required gap ("latitude" vs "lat"); the
/// micro-resolver fills it, and the auto-wired value is never overwritten.
#[tokio::test]
async fn micro_resolution_fills_required_gap() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::<Value>::new()));
    let seen_clone = seen.clone();
    let router = Router::new()
        .route(
            "/api/capabilities/locate",
            post(|Json(_): Json<Value>| async move {
                Json(json!({"latitude": 35.68, "lon": 139.69}))
            }),
        )
        .route(
            "/api/capabilities/get_weather",
            post(move |Json(body): Json<Value>| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({"temp": 18.0}))
                }
            }),
        );
    let addr = serve(router).await;

    let catalog = ComponentCatalog::new();
    catalog
        .register(
            Component::new("c1", "geo-service", addr.ip().to_string(), addr.port())
                .with_capability(Capability::new("locate")),
        )
        .await
        .unwrap();
    catalog
        .register(
            Component::new("c2", "weather-service", addr.ip().to_string(), addr.port())
                .with_capability(
                    Capability::new("get_weather")
                        .with_parameter(number_param("lat"))
                        .with_parameter(number_param("lon")),
                ),
        )
        .await
        .unwrap();

    let plan = json!({
        "steps": [
            {"step_id": "s1", "component_name": "geo-service",
             "metadata": {"capability": "locate", "parameters": {"city": "Tokyo"}}},
            {"step_id": "s2", "component_name": "weather-service", "depends_on": ["s1"],
             "metadata": {"capability": "get_weather", "parameters": {}}}
        ]
    })
    .to_string();

    // Call 1: the plan. Call 2: micro-resolution for the missing "lat";
    // the model also (wrongly) claims lon=0 — auto-wiring must win.
    let provider = Arc::new(MockLLMProvider::new(vec![
        plan,
        json!({"lat": 35.68, "lon": 0.0}).to_string(),
    ]));

    let orchestrator = Orchestrator::new(
        Arc::new(catalog),
        provider,
        OrchestratorConfig::default(),
    )
    .unwrap();

    let ctx = ExecutionContext::new("req-micro");
    let response = orchestrator.process(&ctx, "weather in Tokyo").await.unwrap();
    assert!(response.result.success, "errors: {:?}", response.result.errors);

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["lat"], json!(35.68), "micro-resolved gap");
    assert_eq!(bodies[0]["lon"], json!(139.69), "auto-wired value must win over the model's 0.0");
}
