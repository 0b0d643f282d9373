//! HTTP surface
//!
//! - `POST /value_update`: JSON body with optional `activity` and `heartrate`
//! - `GET /sleep_history?count=N`: most recent episodes, newest first
//!
//! Every non-history response is a JSON object with a `status` field and, on
//! error, a `message` field.

use crate::error::DetectorError;
use crate::service::{IngestRequest, SleepDetector, DEFAULT_HISTORY_COUNT};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

fn ok() -> Response {
    (
        StatusCode::OK,
        Json(StatusBody {
            status: "ok",
            message: None,
        }),
    )
        .into_response()
}

fn failure(code: StatusCode, message: &'static str) -> Response {
    (
        code,
        Json(StatusBody {
            status: "error",
            message: Some(message),
        }),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    count: Option<String>,
}

impl HistoryParams {
    /// Unparsable counts fall back to the default
    fn count(&self) -> usize {
        self.count
            .as_deref()
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(DEFAULT_HISTORY_COUNT)
    }
}

/// Build the router over a running detector
pub fn router(detector: Arc<SleepDetector>) -> Router {
    Router::new()
        .route("/value_update", post(value_update))
        .route("/sleep_history", get(sleep_history))
        .with_state(detector)
}

/// Serve the router on `addr` until `shutdown` resolves
pub async fn serve<F>(
    addr: &str,
    detector: Arc<SleepDetector>,
    shutdown: F,
) -> Result<(), DetectorError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router(detector))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn value_update(State(detector): State<Arc<SleepDetector>>, body: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "rejected malformed ingestion body");
            return failure(StatusCode::BAD_REQUEST, "cannot parse request");
        }
    };

    match IngestRequest::from_value(&value) {
        Ok(request) => {
            detector.ingest(&request);
            ok()
        }
        Err(e) => {
            warn!(error = %e, "ingestion processing failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "processing error")
        }
    }
}

async fn sleep_history(
    State(detector): State<Arc<SleepDetector>>,
    Query(params): Query<HistoryParams>,
) -> Response {
    match detector.history(params.count()).await {
        Ok(episodes) => (StatusCode::OK, Json(episodes)).into_response(),
        Err(e) => {
            warn!(error = %e, "sleep history query failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "history unavailable")
        }
    }
}
