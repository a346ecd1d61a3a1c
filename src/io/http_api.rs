//! HTTP API for submissions, occupancy reads, and metrics
//!
//! Routes:
//! - `POST /entries` - score a submission, log it when accepted
//! - `GET /occupancy` - current count; roster too with the admin token
//! - `GET /subjects/{id}/history` - a subject's accepted events (admin)
//! - `GET /metrics` - Prometheus text format
//! - `GET /health`
//!
//! Uses hyper for the HTTP server.

use crate::domain::error::ValidationError;
use crate::domain::types::{EntryRequest, SubjectId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::evaluator::{EntryEvaluator, Submission};
use crate::services::scorer::Assessment;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared state behind every request
pub struct ApiState {
    evaluator: Arc<EntryEvaluator>,
    metrics: Arc<Metrics>,
    site_id: String,
    admin_token: Option<String>,
}

impl ApiState {
    pub fn new(config: &Config, evaluator: Arc<EntryEvaluator>, metrics: Arc<Metrics>) -> Self {
        Self {
            evaluator,
            metrics,
            site_id: config.site_id().to_string(),
            admin_token: config.admin_token().map(str::to_string),
        }
    }

    /// True if the request carries `Authorization: Bearer <admin_token>`
    fn is_privileged<B>(&self, req: &Request<B>) -> bool {
        let Some(expected) = self.admin_token.as_deref() else {
            return false;
        };
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| bool::from(token.trim().as_bytes().ct_eq(expected.as_bytes())))
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn confidence_json(assessment: &Assessment) -> Value {
    json!({
        "total": assessment.total,
        "gps": assessment.signals.gps,
        "wifi": assessment.signals.wifi,
        "motion": assessment.signals.motion,
    })
}

fn validation_response(e: &ValidationError) -> Response<Full<Bytes>> {
    let (status, error) = match e {
        ValidationError::BodyTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
        _ => (StatusCode::BAD_REQUEST, "validation_error"),
    };
    json_response(status, json!({ "error": error, "message": e.to_string() }))
}

async fn read_entry_request<B>(body: B) -> Result<EntryRequest, ValidationError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ValidationError::BodyTooLarge { limit: MAX_BODY_BYTES }
            } else {
                ValidationError::MalformedBody(e.to_string())
            }
        })?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| ValidationError::MalformedBody(e.to_string()))
}

async fn handle_submit<B>(req: Request<B>, state: &ApiState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request = match read_entry_request(req.into_body()).await {
        Ok(r) => r,
        Err(e) => {
            // Count unparseable bodies the same as other malformed input
            state.metrics.record_submission();
            state.metrics.record_validation_error();
            debug!(error = %e, "entry_body_rejected");
            return validation_response(&e);
        }
    };

    match state.evaluator.submit(&request) {
        Ok(Submission::Accepted { event, assessment, .. }) => json_response(
            StatusCode::OK,
            json!({
                "success": true,
                "eventId": event.event_id,
                "confidence": confidence_json(&assessment),
                "autoLogged": event.auto_logged,
            }),
        ),
        Ok(Submission::Rejected { assessment }) => json_response(
            StatusCode::BAD_REQUEST,
            json!({
                "error": "entry_rejected",
                "message": assessment.decision.rejection_message().unwrap_or("rejected"),
                "confidence": confidence_json(&assessment),
            }),
        ),
        Err(e) => validation_response(&e),
    }
}

fn handle_occupancy<B>(req: &Request<B>, state: &ApiState) -> Response<Full<Bytes>> {
    let tracker = state.evaluator.tracker();
    if state.is_privileged(req) {
        let snapshot = tracker.snapshot();
        json_response(
            StatusCode::OK,
            json!({
                "space": tracker.space(),
                "currentOccupancy": snapshot.count,
                "roster": snapshot.roster,
            }),
        )
    } else {
        json_response(
            StatusCode::OK,
            json!({ "space": tracker.space(), "currentOccupancy": tracker.current_occupancy() }),
        )
    }
}

fn handle_history<B>(req: &Request<B>, state: &ApiState, segment: &str) -> Response<Full<Bytes>> {
    if !state.is_privileged(req) {
        warn!(subject = %segment, "history_unauthorized");
        return json_response(StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" }));
    }
    let subject = match urlencoding::decode(segment) {
        Ok(subject) => subject,
        Err(_) => {
            return validation_response(&ValidationError::InvalidSubjectEncoding(segment.to_string()))
        }
    };
    let subject_id = SubjectId::new(subject.into_owned());
    let events = state.evaluator.tracker().history_for(&subject_id);
    json_response(StatusCode::OK, json!({ "subjectId": subject_id, "events": events }))
}

/// Extract the still-encoded `{id}` segment from `/subjects/{id}/history`
fn history_subject(path: &str) -> Option<&str> {
    path.strip_prefix("/subjects/")?
        .strip_suffix("/history")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Handle HTTP requests
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/entries") => handle_submit(req, &state).await,
        (&Method::GET, "/occupancy") => handle_occupancy(&req, &state),
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&state.metrics, &state.site_id),
        ),
        (&Method::GET, "/health") => {
            text_response(StatusCode::OK, "text/plain", "ok".to_string())
        }
        // CORS preflight for entries
        (&Method::OPTIONS, "/entries") => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        (&Method::GET, p) => match history_subject(p) {
            Some(subject) => handle_history(&req, &state, subject),
            None => not_found(),
        },
        _ => not_found(),
    };

    debug!(method = %method, path = %path, status = %response.status().as_u16(), "http_request");
    Ok(response)
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, json!({ "error": "not_found" }))
}

/// Serve the API on an already-bound listener until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind the configured address and serve the API
pub async fn start_http_server(
    config: &Config,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.http_bind_address(), config.http_port());
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, site = %config.site_id(), space = %config.space_id(), "http_server_started");
    serve(listener, state, shutdown).await
}
