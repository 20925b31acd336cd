//! Mock component servers.
//!
//! Spin up real `axum` listeners on ephemeral ports so integration tests
//! exercise the actual transport path, and register matching catalog
//! entries.

use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tutti_kernel::component::{Capability, CapabilityParameter, Component, ParameterType};
use tutti_runtime::catalog::ComponentCatalog;

/// A running mock component plus its invocation counter.
pub struct MockComponent {
    pub component: Component,
    pub hits: Arc<AtomicUsize>,
}

impl MockComponent {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Serve a router on an ephemeral port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A component with one capability that always replies `response`.
pub async fn fixed_response_component(
    name: &str,
    capability: &str,
    parameters: Vec<CapabilityParameter>,
    response: Value,
) -> MockComponent {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    let router = Router::new().route(
        &format!("/api/capabilities/{capability}"),
        post(move |Json(_): Json<Value>| {
            let hits = hits_clone.clone();
            let response = response.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(response).into_response()
            }
        }),
    );
    let addr = serve(router).await;

    let mut cap = Capability::new(capability);
    for parameter in parameters {
        cap = cap.with_parameter(parameter);
    }
    let component = Component::new(
        format!("{name}-id"),
        name,
        addr.ip().to_string(),
        addr.port(),
    )
    .with_capability(cap);

    MockComponent { component, hits }
}

/// Register mock components into a fresh catalog.
pub async fn catalog_of(components: &[&MockComponent]) -> Arc<ComponentCatalog> {
    let catalog = ComponentCatalog::new();
    for mock in components {
        catalog.register(mock.component.clone()).await.unwrap();
    }
    Arc::new(catalog)
}

/// Shorthand for a required number parameter.
pub fn number_param(name: &str) -> CapabilityParameter {
    CapabilityParameter::new(name, ParameterType::Number).required()
}

/// Shorthand for a required string parameter.
pub fn string_param(name: &str) -> CapabilityParameter {
    CapabilityParameter::new(name, ParameterType::String).required()
}
