//! Read-only HTTP endpoints served alongside the daemon.

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use hyperindex_core::Snapshot;
use hyperindex_store::{HistoryRecord, SnapshotStore};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct ApiState {
    pub store: SnapshotStore,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/snapshot/latest", get(latest_snapshot))
        .route("/api/v1/history", get(history))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health record, with 503 when the last run failed or none has run.
async fn health(State(state): State<ApiState>) -> AppResult<impl IntoResponse> {
    let status = state.store.health().read().ok_or(AppError::NeverRun)?;
    let code = if status.is_success() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((code, Json(status)))
}

async fn latest_snapshot(State(state): State<ApiState>) -> AppResult<Json<Snapshot>> {
    let snapshot = state
        .store
        .read_latest()?
        .ok_or_else(|| AppError::NotFound("latest snapshot".to_string()))?;
    Ok(Json(snapshot))
}

async fn history(State(state): State<ApiState>) -> AppResult<Json<HistoryRecord>> {
    Ok(Json(state.store.read_history()?))
}

pub async fn serve(addr: &str, state: ApiState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "HTTP endpoint listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use hyperindex_core::PortfolioTotals;
    use hyperindex_store::{FailureKind, RunFailure, RunReport, StoreOptions};
    use std::time::Duration;
    use tower::ServiceExt;

    fn store(dir: &std::path::Path) -> SnapshotStore {
        SnapshotStore::new(dir, StoreOptions::default())
    }

    async fn get_json(store: &SnapshotStore, uri: &str) -> (StatusCode, serde_json::Value) {
        let app = create_router(ApiState { store: store.clone() });
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn report(failure: Option<RunFailure>) -> RunReport {
        RunReport {
            finished_at: Utc.with_ymd_and_hms(2026, 2, 18, 12, 0, 2).unwrap(),
            duration: Duration::from_millis(1500),
            wallets_total: 10,
            wallets_failed: 0,
            conviction: None,
            failure,
        }
    }

    #[tokio::test]
    async fn test_health_before_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(&store(dir.path()), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "NEVER_RUN");
    }

    #[tokio::test]
    async fn test_health_reflects_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.health().record(&report(None)).unwrap();
        let (status, body) = get_json(&store, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "success");

        store
            .health()
            .record(&report(Some(RunFailure {
                kind: FailureKind::Cohort,
                detail: "cohort file missing".to_string(),
            })))
            .unwrap();
        let (status, body) = get_json(&store, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error_detail"], "cohort file missing");
    }

    #[tokio::test]
    async fn test_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let (status, _) = get_json(&store, "/api/v1/snapshot/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let snapshot = Snapshot {
            generated_at: Utc.with_ymd_and_hms(2026, 2, 18, 12, 0, 0).unwrap(),
            cohort_rebalanced_at: None,
            cohort_size: 1,
            wallets_total: 1,
            wallets_failed: 0,
            totals: PortfolioTotals::default(),
            assets: vec![],
        };
        store.persist(&snapshot).unwrap();

        let (status, body) = get_json(&store, "/api/v1/snapshot/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cohort_size"], 1);

        let (status, body) = get_json(&store, "/api/v1/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
    }
}
