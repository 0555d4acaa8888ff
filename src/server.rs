//! HTTP endpoints for health checks, relay info, queries, and chain audits.

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Query as AxumQuery, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};

use crate::{
    chain,
    error::RelayError,
    event::Coordinate,
    kinds,
    pipeline::Pipeline,
    store::Filter,
};

#[derive(Clone)]
struct HttpState {
    pipeline: Arc<Pipeline>,
    name: String,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Start an HTTP server exposing `/healthz`, `/query`, `/audit`, and relay
/// info.
pub async fn serve_http(
    addr: SocketAddr,
    pipeline: Arc<Pipeline>,
    name: String,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let state = Arc::new(HttpState { pipeline, name });
    let app = Router::new()
        .route("/", get(relay_info))
        .route("/healthz", get(healthz))
        .route("/query", get(query))
        .route("/audit", get(audit))
        .route("/audit/orphans", get(audit_orphans))
        .with_state(state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Health check endpoint.
async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Relay information document.
#[derive(Serialize, Deserialize)]
struct RelayInfo {
    /// Human-readable relay name.
    name: String,
    /// Software identifier.
    software: String,
    /// Semantic version string such as "0.1.0".
    version: String,
    /// Marketplace kinds this relay validates and audits.
    supported_kinds: Vec<u32>,
}

async fn relay_info(State(state): State<Arc<HttpState>>) -> impl axum::response::IntoResponse {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(RelayInfo {
            name: state.name.clone(),
            software: "adrelay".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            supported_kinds: kinds::protocol_kinds().to_vec(),
        }),
    )
}

/// URL query parameters accepted by the `/query` endpoint.
#[derive(Deserialize)]
struct QueryParams {
    /// Comma-separated event ids.
    ids: Option<String>,
    /// Comma-separated hex public keys.
    authors: Option<String>,
    /// Comma-separated kind numbers (e.g. `30422,30424`).
    kinds: Option<String>,
    /// Single `#d` tag value.
    d: Option<String>,
    /// Minimum `created_at` timestamp.
    since: Option<String>,
    /// Maximum `created_at` timestamp.
    until: Option<String>,
    /// Maximum number of events to return.
    limit: Option<String>,
}

/// Convert query string parameters into a [`Filter`] shared with the
/// WebSocket API.
fn params_to_filter(params: QueryParams) -> Filter {
    let csv = |s: String| -> Vec<String> { crate::config::csv_strings(s) };
    Filter {
        ids: params.ids.map(&csv).filter(|v| !v.is_empty()),
        authors: params.authors.map(&csv).filter(|v| !v.is_empty()),
        kinds: params.kinds.map(|s| {
            s.split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect::<Vec<u32>>()
        }),
        d: params.d,
        since: params.since.and_then(|v| v.parse().ok()),
        until: params.until.and_then(|v| v.parse().ok()),
        limit: params.limit.and_then(|v| v.parse().ok()),
    }
}

/// Parse query parameters and return matching events as NDJSON.
///
/// Storage trouble yields an empty body plus a notice header rather than a
/// failed response.
async fn query(
    State(state): State<Arc<HttpState>>,
    AxumQuery(params): AxumQuery<QueryParams>,
) -> axum::response::Response {
    let filter = params_to_filter(params);
    match state.pipeline.run_query(&[filter]) {
        Ok(events) => {
            let body = events
                .into_iter()
                .filter_map(|e| serde_json::to_string(&e).ok())
                .collect::<Vec<_>>()
                .join("\n");
            axum::response::Response::builder()
                .header("Content-Type", "application/x-ndjson")
                .body(Body::from(body))
                .unwrap_or_default()
        }
        Err(RelayError::QueryRejected(reason)) => axum::response::Response::builder()
            .status(StatusCode::FORBIDDEN)
            .body(Body::from(reason))
            .unwrap_or_default(),
        Err(err) => {
            tracing::warn!(%err, "query failed");
            axum::response::Response::builder()
                .header("Content-Type", "application/x-ndjson")
                .header("X-Relay-Notice", err.to_string())
                .body(Body::empty())
                .unwrap_or_default()
        }
    }
}

/// Parameters for the `/audit` endpoint.
#[derive(Deserialize)]
struct AuditParams {
    /// Match coordinate, e.g. `30424:<pubkey>:m1`.
    #[serde(rename = "match")]
    coordinate: String,
}

/// Reconstruct the confirmation chain for one match identity.
async fn audit(
    State(state): State<Arc<HttpState>>,
    AxumQuery(params): AxumQuery<AuditParams>,
) -> axum::response::Response {
    let coord = match Coordinate::parse(&params.coordinate) {
        Ok(c) => c,
        Err(reason) => {
            return axum::response::Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::from(reason))
                .unwrap_or_default()
        }
    };
    let store = state.pipeline.store();
    match chain::reconstruct(store.as_ref(), &coord) {
        Ok(report) => Json(report).into_response(),
        Err(err) => axum::response::Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(err.to_string()))
            .unwrap_or_default(),
    }
}

/// List stored confirmations whose referenced match is absent.
async fn audit_orphans(State(state): State<Arc<HttpState>>) -> axum::response::Response {
    let store = state.pipeline.store();
    match chain::orphans(store.as_ref()) {
        Ok(orphans) => Json(orphans).into_response(),
        Err(err) => axum::response::Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(err.to_string()))
            .unwrap_or_default(),
    }
}
