use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    error::{ScanError, ValidationError},
    export::{self, ExportFormat},
    ports::{self, PortSpec},
    scanner::{self, Schedule},
    services::{self, PortGroup, PortMetadata},
    types::{Protocol, ProtocolResults, ScanRequest, ScanUpdate},
};

/// Updates buffered between the scan task and a slow SSE consumer.
const STREAM_BUFFER: usize = 16;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<ServerConfig>, // read-only; every scan owns its own state
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub schedule: Schedule,
    pub ui_dir: PathBuf,
    pub default_timeout_ms: u64,
}

impl From<&Settings> for ServerConfig {
    fn from(s: &Settings) -> Self {
        Self {
            schedule: s.schedule,
            ui_dir: s.ui_dir.clone(),
            default_timeout_ms: s.timeout_ms,
        }
    }
}

/// Body of `POST /api/scan`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub target_ip: String,
    #[serde(default)]
    pub port_range: Option<[u32; 2]>,
    #[serde(default)]
    pub port_list: Option<String>,
    #[serde(default)]
    pub port_groups: Vec<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub export_format: Option<String>,
}

/// Query string of `GET /api/scan/stream`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    pub target_ip: String,
    pub start_port: Option<u32>,
    pub end_port: Option<u32>,
    pub port_list: Option<String>,
    /// Comma-separated group names.
    pub port_groups: Option<String>,
    pub protocol: Option<String>,
    pub timeout: Option<u64>,
}

/// Body of `POST /api/export`.
#[derive(Debug, Deserialize)]
pub struct ExportBody {
    pub results: ProtocolResults,
    pub format: String,
}

fn default_protocol() -> String {
    "TCP".into()
}

pub fn router(config: ServerConfig) -> Router {
    let static_svc = ServeDir::new(&config.ui_dir).append_index_html_on_directories(true);
    let state = AppState { inner: Arc::new(config) };

    let api = Router::new()
        .route("/scan", post(post_scan))
        .route("/scan/stream", get(get_scan_stream))
        .route("/export", post(post_export))
        .route("/port-groups", get(get_port_groups))
        .route("/services/{protocol}/{port}", get(get_service))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn spawn_server(bind: &str, config: ServerConfig) -> Result<()> {
    let app = router(config);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving UI on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn post_scan(
    State(app): State<AppState>,
    body: Result<Json<ScanBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let spec = port_spec(
        body.port_range.map(|[start, end]| (start, end)),
        body.port_list.as_deref(),
        &body.port_groups,
    )?;
    let req = ScanRequest::new(
        &body.target_ip,
        &spec,
        &body.protocol,
        Some(body.timeout.unwrap_or(app.inner.default_timeout_ms)),
    )?
    .with_export_format(body.export_format.as_deref())?;

    let summary = scanner::scan(&req, app.inner.schedule).await?;
    let results = summary.results();
    match req.export_format() {
        Some(format) => Ok(download(export::export_results(&results, format)?, format)),
        None => Ok(Json(results).into_response()),
    }
}

async fn get_scan_stream(
    State(app): State<AppState>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let Query(params) = params?;
    let groups: Vec<String> = params
        .port_groups
        .as_deref()
        .map(|g| {
            g.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let range = match (params.start_port, params.end_port) {
        (Some(start), end) => Some((start, end.unwrap_or(start))),
        (None, Some(_)) => return Err(ValidationError::MissingField("startPort", "endPort").into()),
        (None, None) => None,
    };
    let spec = port_spec(range, params.port_list.as_deref(), &groups)?;
    let req = ScanRequest::new(
        &params.target_ip,
        &spec,
        params.protocol.as_deref().unwrap_or("TCP"),
        Some(params.timeout.unwrap_or(app.inner.default_timeout_ms)),
    )?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(run_stream_scan(req, app.inner.schedule, tx));

    let stream = ReceiverStream::new(rx).map(|update| Event::default().json_data(update));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Drive one streaming scan. A consumer that disconnects cancels the scan,
/// which aborts the probes of the batch in flight.
async fn run_stream_scan(req: ScanRequest, schedule: Schedule, tx: mpsc::Sender<ScanUpdate>) {
    let cancel = CancellationToken::new();
    let watcher = {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("stream consumer disconnected");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let res = scanner::scan_with_progress(&req, schedule, cancel.clone(), tx).await;
    cancel.cancel();
    let _ = watcher.await;

    match res {
        Ok(summary) if summary.completed => debug!(target_ip = %summary.target, "streaming scan done"),
        Ok(summary) => info!(target_ip = %summary.target, "streaming scan cancelled"),
        Err(e) => warn!(error = %e, "streaming scan aborted"),
    }
}

async fn post_export(body: Result<Json<ExportBody>, JsonRejection>) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let format: ExportFormat = body.format.parse()?;
    let doc = export::export_results(&body.results, format)?;
    Ok(download(doc, format))
}

async fn get_port_groups() -> Json<&'static [PortGroup]> {
    Json(services::groups())
}

async fn get_service(
    Path((protocol, port)): Path<(String, u16)>,
) -> Result<Json<&'static PortMetadata>, ApiError> {
    let protocol: Protocol = protocol.parse()?;
    services::lookup(protocol, port)
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Groups beat an explicit list, which beats a range.
fn port_spec(
    range: Option<(u32, u32)>,
    list: Option<&str>,
    groups: &[String],
) -> Result<PortSpec, ValidationError> {
    if !groups.is_empty() {
        return Ok(PortSpec::Groups(groups.to_vec()));
    }
    if let Some(list) = list.filter(|l| !l.trim().is_empty()) {
        let ports = ports::parse_port_list(list)?;
        return Ok(PortSpec::List(ports.into_iter().map(u32::from).collect()));
    }
    match range {
        Some((start, end)) => Ok(PortSpec::Range { start, end }),
        None => Err(ValidationError::InvalidPortList(
            "no port range, port list or port group given".into(),
        )),
    }
}

fn download(body: String, format: ExportFormat) -> Response {
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"scan-results.{}\"", format.extension()),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    NotFound,
    Internal(anyhow::Error),
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        ApiError::Validation(malformed(&r, "body"))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(r: QueryRejection) -> Self {
        ApiError::Validation(malformed(&r, "query"))
    }
}

/// Turn an extractor rejection into a field-level validation error. The
/// deserializer reports the failing field either as a `path: ` prefix or as
/// ``missing field `name` ``.
fn malformed<E: std::error::Error>(rejection: &E, fallback: &str) -> ValidationError {
    let reason = rejection
        .source()
        .map(ToString::to_string)
        .unwrap_or_else(|| rejection.to_string());
    let field = offending_field(&reason).unwrap_or(fallback).to_string();
    ValidationError::Malformed { field, reason }
}

fn offending_field(reason: &str) -> Option<&str> {
    if let Some((_, rest)) = reason.split_once("missing field `") {
        return rest.split('`').next().filter(|f| !f.is_empty());
    }
    let (path, _) = reason.split_once(": ")?;
    let top = path.split(['.', '[']).next()?;
    let ident = top.chars().next()?.is_ascii_alphabetic()
        && top.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    ident.then_some(top)
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Validation(v) => ApiError::Validation(v),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string(), "field": e.field() })),
            )
                .into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal(e) => {
                warn!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_take_precedence_over_range() {
        let spec = port_spec(Some((1, 1024)), None, &["HTTP/HTTPS".to_string()]).unwrap();
        assert_eq!(ports::resolve(&spec).unwrap(), vec![80, 443]);
    }

    #[test]
    fn list_beats_range() {
        let spec = port_spec(Some((1, 1024)), Some("22,8000-8001"), &[]).unwrap();
        assert_eq!(spec, PortSpec::List(vec![22, 8000, 8001]));
    }

    #[test]
    fn field_comes_from_deserializer_path() {
        assert_eq!(offending_field("startPort: invalid digit found in string"), Some("startPort"));
        assert_eq!(
            offending_field("portRange[1]: invalid value: integer `-1`, expected u32"),
            Some("portRange")
        );
        assert_eq!(
            offending_field("missing field `targetIp` at line 1 column 2"),
            Some("targetIp")
        );
        assert_eq!(offending_field("EOF while parsing a value at line 1 column 0"), None);
    }

    #[test]
    fn missing_ports_rejected() {
        assert!(port_spec(None, Some("  "), &[]).is_err());
    }
}
