//! Admission webhook endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::admission::batcher::AdmissionBatcher;
use crate::error::ControllerError;
use crate::model::{RoutingDeclaration, SettingsParser};
use crate::observability::metrics;
use crate::routing;
use crate::sync::RunningConfig;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AdmissionState {
    pub batcher: Arc<AdmissionBatcher>,
    pub running: RunningConfig,
    pub parser: SettingsParser,
    pub strict_path_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdmissionResponse {
    fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: String,
    pub checksum: Option<String>,
    pub servers: usize,
    pub backends: usize,
    pub passthrough_hosts: usize,
    pub admission_running: bool,
    pub admission_pending: usize,
}

pub fn admission_router(state: AdmissionState) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}

async fn validate(
    State(state): State<AdmissionState>,
    Json(declaration): Json<RoutingDeclaration>,
) -> (StatusCode, Json<AdmissionResponse>) {
    let key = declaration.key();

    // Problems local to this declaration never reach the shared batch.
    if let Err(e) = routing::resolve_declaration(
        declaration.clone(),
        &state.parser,
        state.strict_path_validation,
    ) {
        metrics::record_admission_verdict("denied");
        tracing::info!(declaration = %key, error = %e, "Declaration denied");
        return (StatusCode::OK, Json(AdmissionResponse::denied(e.to_string())));
    }

    match state.batcher.validate(declaration).await {
        Ok(()) => {
            metrics::record_admission_verdict("allowed");
            tracing::debug!(declaration = %key, "Declaration allowed");
            (StatusCode::OK, Json(AdmissionResponse::allowed()))
        }
        Err(e @ ControllerError::AdmissionUnavailable) => {
            metrics::record_admission_verdict("unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(AdmissionResponse::denied(e.to_string())))
        }
        Err(e @ ControllerError::AdmissionTimeout(_)) => {
            metrics::record_admission_verdict("timeout");
            tracing::warn!(declaration = %key, "Admission timed out");
            (StatusCode::GATEWAY_TIMEOUT, Json(AdmissionResponse::denied(e.to_string())))
        }
        Err(e) => {
            metrics::record_admission_verdict("denied");
            tracing::info!(declaration = %key, error = %e, "Declaration denied");
            (StatusCode::OK, Json(AdmissionResponse::denied(e.to_string())))
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AdmissionState>) -> Json<StatusReport> {
    let running = state.running.load();
    let config = running.as_deref();
    Json(StatusReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        checksum: config.and_then(|c| c.checksum.clone()),
        servers: config.map_or(0, |c| c.servers.len()),
        backends: config.map_or(0, |c| c.backends.len()),
        passthrough_hosts: config.map_or(0, |c| c.passthrough_backends.len()),
        admission_running: state.batcher.is_running(),
        admission_pending: state.batcher.pending(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::batcher::{BatchValidator, BatcherOptions};
    use crate::error::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    struct AcceptAll;

    #[async_trait]
    impl BatchValidator for AcceptAll {
        async fn validate_batch(&self, _batch: &[RoutingDeclaration]) -> Result<()> {
            Ok(())
        }
    }

    fn state(started: bool) -> AdmissionState {
        let batcher = Arc::new(AdmissionBatcher::new(
            Arc::new(AcceptAll),
            BatcherOptions {
                window: std::time::Duration::from_millis(1),
                ..BatcherOptions::default()
            },
        ));
        if started {
            batcher.start();
        }
        AdmissionState {
            batcher,
            running: RunningConfig::default(),
            parser: SettingsParser::default(),
            strict_path_validation: false,
        }
    }

    fn post(decl: &RoutingDeclaration) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/validate")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(decl).unwrap()))
            .unwrap()
    }

    async fn verdict(response: axum::response::Response) -> AdmissionResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn decl(annotations: &[(&str, &str)]) -> RoutingDeclaration {
        RoutingDeclaration {
            namespace: "default".into(),
            name: "web".into(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stopped_batcher_is_unavailable() {
        let response = admission_router(state(false))
            .oneshot(post(&decl(&[])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!verdict(response).await.allowed);
    }

    #[tokio::test]
    async fn test_bad_settings_denied_before_batching() {
        let bad = decl(&[("nginx.ingress.kubernetes.io/use-regex", "maybe")]);
        // Denied even though the batcher is stopped.
        let response = admission_router(state(false))
            .oneshot(post(&bad))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let verdict = verdict(response).await;
        assert!(!verdict.allowed);
        assert!(verdict.message.is_some());
    }

    #[tokio::test]
    async fn test_accepted_declaration_is_allowed() {
        let state = state(true);
        let batcher = state.batcher.clone();
        let response = admission_router(state)
            .oneshot(post(&decl(&[])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(verdict(response).await, AdmissionResponse::allowed());
        batcher.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/validate")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = admission_router(state(false)).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
