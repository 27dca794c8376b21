//! HTTP surface: routing, request validation, and the SSE scan responder.
//!
//! Handlers validate paths and identifiers, delegate the real work to the
//! scanner, analyzer, comparator, and snapshot store, and map failures to
//! the error kinds in [`crate::error`]. Walks and hashing run on blocking
//! threads; the responder side polls their progress with a short timeout so
//! frames flush promptly.

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header::{HeaderName, HeaderValue, CACHE_CONTROL};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::analyzer::{self, ExtensionSummary, Finding};
use crate::compare::{self, ComparisonItem, ComparisonReport, ComparisonSummary};
use crate::db::{Database, Snapshot, SnapshotType};
use crate::error::ApiError;
use crate::registry::ScanRegistry;
use crate::scanner::{format_size, CompletedScan, ScanProgress, ScanSummary, Scanner};

/// How long the SSE responder waits on the progress channel before checking
/// whether the walk has finished.
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct AppState {
    pub registry: ScanRegistry,
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            registry: ScanRegistry::new(),
            db,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scan", post(run_scan))
        .route("/api/scan/stream", get(stream_scan))
        .route("/api/findings", get(get_findings))
        .route("/api/extensions-summary", get(get_extensions_summary))
        .route("/api/compare", post(run_compare))
        .route("/api/snapshots", post(create_snapshot).get(list_snapshots))
        .route("/api/snapshots/comparison", post(create_comparison_snapshot))
        .route(
            "/api/snapshots/comparison/{id}",
            axum::routing::put(refresh_comparison_snapshot),
        )
        .route(
            "/api/snapshots/{id}",
            get(get_snapshot)
                .put(refresh_snapshot)
                .delete(delete_snapshot),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Permissive CORS. Wildcards cannot be combined with credentials, so every
/// requested origin, method, and header is mirrored back instead.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub root_path: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub root_path: String,
}

#[derive(Debug, Deserialize)]
pub struct FindingsParams {
    pub scan_id: String,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtensionsParams {
    pub scan_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub source_path: String,
    pub target_path: String,
    #[serde(default)]
    pub deep_scan: bool,
}

#[derive(Debug, Serialize)]
pub struct ComparisonResponse {
    pub source_path: String,
    pub target_path: String,
    pub deep_scan: bool,
    pub tree: ComparisonItem,
    pub summary: ComparisonSummary,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub scan_id: String,
    pub root_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ComparisonSnapshotParams {
    pub source_path: String,
    pub target_path: String,
    #[serde(default)]
    pub deep_scan: bool,
}

#[derive(Serialize)]
struct ProgressFrame<'a> {
    scan_id: &'a str,
    event_type: &'static str,
    files_scanned: u64,
    folders_scanned: u64,
    bytes_scanned: u64,
    current_path: String,
    progress_percent: u8,
    elapsed_seconds: f64,
    message: String,
}

#[derive(Serialize)]
struct CompleteFrame<'a> {
    scan_id: &'a str,
    event_type: &'static str,
    scan_response: &'a ScanSummary,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanSummary>, ApiError> {
    let root = require_directory(&request.root_path)?;
    let completed = scan_directory(root).await?;
    let scan = state.registry.insert(completed);
    info!(
        scan_id = %scan.summary.scan_id,
        files = scan.summary.total_files,
        size = %format_size(scan.summary.total_size_bytes),
        "scan complete"
    );
    Ok(Json(scan.summary.clone()))
}

async fn stream_scan(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let root = require_directory(&params.root_path)?;

    let (progress_tx, progress_rx) = mpsc::channel::<ScanProgress>(64);
    let scanner = Scanner::with_progress(&root, progress_tx);
    let scan_id = scanner.scan_id().to_string();
    let walk = tokio::task::spawn_blocking(move || scanner.scan());

    // The pump runs detached: if the client disconnects mid-scan the walk
    // still completes and the result still lands in the registry.
    let (event_tx, event_rx) = mpsc::channel::<Event>(64);
    tokio::spawn(pump_scan_events(
        scan_id,
        walk,
        progress_rx,
        event_tx,
        state.registry.clone(),
    ));

    let stream = ReceiverStream::new(event_rx).map(Ok::<Event, Infallible>);
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

/// Forward progress frames as they arrive, then emit the terminal completion
/// event carrying the assembled summary.
async fn pump_scan_events(
    scan_id: String,
    walk: JoinHandle<CompletedScan>,
    mut progress_rx: mpsc::Receiver<ScanProgress>,
    events: mpsc::Sender<Event>,
    registry: ScanRegistry,
) {
    loop {
        match tokio::time::timeout(PROGRESS_POLL_INTERVAL, progress_rx.recv()).await {
            Ok(Some(progress)) => send_progress(&scan_id, progress, &events).await,
            Ok(None) => break,
            Err(_elapsed) => {
                if walk.is_finished() {
                    while let Ok(progress) = progress_rx.try_recv() {
                        send_progress(&scan_id, progress, &events).await;
                    }
                    break;
                }
            }
        }
    }

    match walk.await {
        Ok(completed) => {
            let scan = registry.insert(completed);
            info!(
                %scan_id,
                files = scan.summary.total_files,
                size = %format_size(scan.summary.total_size_bytes),
                "streaming scan complete"
            );
            let frame = CompleteFrame {
                scan_id: &scan_id,
                event_type: "complete",
                scan_response: &scan.summary,
            };
            send_frame(&frame, &events).await;
        }
        Err(err) => error!(%scan_id, %err, "scan task failed"),
    }
}

async fn send_progress(scan_id: &str, progress: ScanProgress, events: &mpsc::Sender<Event>) {
    let frame = ProgressFrame {
        scan_id,
        event_type: "progress",
        files_scanned: progress.files_scanned,
        folders_scanned: progress.folders_scanned,
        bytes_scanned: progress.bytes_scanned,
        current_path: progress.current_path,
        progress_percent: progress.progress_percent,
        elapsed_seconds: progress.elapsed_seconds,
        message: progress.message,
    };
    send_frame(&frame, events).await;
}

async fn send_frame<T: Serialize>(frame: &T, events: &mpsc::Sender<Event>) {
    match Event::default().json_data(frame) {
        // A closed receiver means the client went away; drop the frame.
        Ok(event) => {
            let _ = events.send(event).await;
        }
        Err(err) => error!(%err, "failed to encode SSE frame"),
    }
}

async fn get_findings(
    State(state): State<AppState>,
    Query(params): Query<FindingsParams>,
) -> Result<Json<Vec<Finding>>, ApiError> {
    let scan = lookup_scan(&state, &params.scan_id)?;
    let mut findings = analyzer::analyze(&scan);
    if let Some(category) = &params.category {
        findings.retain(|f| f.category.as_str() == category);
    }
    Ok(Json(findings))
}

async fn get_extensions_summary(
    State(state): State<AppState>,
    Query(params): Query<ExtensionsParams>,
) -> Result<Json<Vec<ExtensionSummary>>, ApiError> {
    let scan = lookup_scan(&state, &params.scan_id)?;
    Ok(Json(analyzer::extension_summary(&scan.files)))
}

async fn run_compare(
    Json(request): Json<CompareRequest>,
) -> Result<Json<ComparisonResponse>, ApiError> {
    let source = require_directory(&request.source_path)?;
    let target = require_directory(&request.target_path)?;
    let report = run_comparison(source, target, request.deep_scan).await?;
    Ok(Json(ComparisonResponse {
        source_path: request.source_path,
        target_path: request.target_path,
        deep_scan: request.deep_scan,
        tree: report.tree,
        summary: report.summary,
    }))
}

async fn create_snapshot(
    State(state): State<AppState>,
    Json(request): Json<SnapshotRequest>,
) -> Result<Json<Snapshot>, ApiError> {
    let scan = lookup_scan(&state, &request.scan_id)?;
    let snapshot = build_scan_snapshot(
        format!("snapshot-{}", Uuid::new_v4()),
        request.root_path,
        &scan,
    )?;
    state.db.save(&snapshot).await?;
    info!(id = %snapshot.id, "snapshot saved");
    Ok(Json(snapshot))
}

async fn list_snapshots(State(state): State<AppState>) -> Result<Json<Vec<Snapshot>>, ApiError> {
    Ok(Json(state.db.list().await?))
}

async fn get_snapshot(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = lookup_snapshot(&state, &id).await?;
    Ok(Json(snapshot))
}

/// Re-scan the stored root and overwrite the snapshot payload in place.
async fn refresh_snapshot(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = lookup_snapshot(&state, &id).await?;
    if snapshot.snapshot_type == SnapshotType::Comparison {
        return Err(ApiError::ConflictingSnapshotType(format!(
            "snapshot {id} is a comparison snapshot"
        )));
    }

    let root = PathBuf::from(&snapshot.root_path);
    if !root.is_dir() {
        return Err(ApiError::StaleRoot(snapshot.root_path.clone()));
    }

    let completed = scan_directory(root).await?;
    let scan = state.registry.insert(completed);
    let updated = build_scan_snapshot(snapshot.id, snapshot.root_path, &scan)?;
    state.db.update(&updated).await?;
    info!(id = %updated.id, "snapshot refreshed");
    Ok(Json(updated))
}

async fn delete_snapshot(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.db.delete(&id).await? {
        return Err(ApiError::NotFound(format!("snapshot {id}")));
    }
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

async fn create_comparison_snapshot(
    State(state): State<AppState>,
    Query(params): Query<ComparisonSnapshotParams>,
) -> Result<Json<Snapshot>, ApiError> {
    let source = require_directory(&params.source_path)?;
    let target = require_directory(&params.target_path)?;
    let report = run_comparison(source, target, params.deep_scan).await?;

    let snapshot = build_comparison_snapshot(
        format!("comparison-{}", Uuid::new_v4()),
        params.source_path,
        params.target_path,
        params.deep_scan,
        report,
    );
    state.db.save(&snapshot).await?;
    info!(id = %snapshot.id, "comparison snapshot saved");
    Ok(Json(snapshot))
}

/// Re-run the stored comparison (same source, target, and depth) and
/// overwrite the snapshot payload.
async fn refresh_comparison_snapshot(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = lookup_snapshot(&state, &id).await?;
    if snapshot.snapshot_type != SnapshotType::Comparison {
        return Err(ApiError::ConflictingSnapshotType(format!(
            "snapshot {id} is not a comparison snapshot"
        )));
    }

    let target_path = snapshot
        .target_path
        .clone()
        .ok_or_else(|| anyhow::anyhow!("comparison snapshot {id} has no target path"))?;
    let source = PathBuf::from(&snapshot.root_path);
    let target = PathBuf::from(&target_path);
    if !source.is_dir() {
        return Err(ApiError::StaleRoot(snapshot.root_path.clone()));
    }
    if !target.is_dir() {
        return Err(ApiError::StaleRoot(target_path));
    }

    let deep_scan = snapshot
        .comparison_summary
        .as_ref()
        .map(|s| s.deep_scan)
        .unwrap_or(false);
    let report = run_comparison(source, target, deep_scan).await?;

    let updated = build_comparison_snapshot(
        snapshot.id,
        snapshot.root_path,
        target_path,
        deep_scan,
        report,
    );
    state.db.update(&updated).await?;
    info!(id = %updated.id, "comparison snapshot refreshed");
    Ok(Json(updated))
}

fn lookup_scan(state: &AppState, scan_id: &str) -> Result<Arc<CompletedScan>, ApiError> {
    state
        .registry
        .get(scan_id)
        .ok_or_else(|| ApiError::NotFound(format!("scan {scan_id}")))
}

async fn lookup_snapshot(state: &AppState, id: &str) -> Result<Snapshot, ApiError> {
    state
        .db
        .load(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("snapshot {id}")))
}

fn require_directory(raw: &str) -> Result<PathBuf, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidPath("path is empty".to_string()));
    }
    let path = PathBuf::from(trimmed);
    if !path.is_dir() {
        return Err(ApiError::InvalidPath(format!(
            "{trimmed} is not a directory"
        )));
    }
    Ok(path)
}

async fn scan_directory(root: PathBuf) -> Result<CompletedScan, ApiError> {
    tokio::task::spawn_blocking(move || Scanner::new(&root).scan())
        .await
        .map_err(|err| anyhow::Error::from(err).into())
}

async fn run_comparison(
    source: PathBuf,
    target: PathBuf,
    deep_scan: bool,
) -> Result<ComparisonReport, ApiError> {
    tokio::task::spawn_blocking(move || compare::compare_trees(&source, &target, deep_scan))
        .await
        .map_err(|err| anyhow::Error::from(err).into())
}

fn build_scan_snapshot(
    id: String,
    root_path: String,
    scan: &CompletedScan,
) -> Result<Snapshot, ApiError> {
    let findings = analyzer::analyze(scan);
    let extensions = analyzer::extension_summary(&scan.files);
    let scan_info = serde_json::to_value(&scan.summary).map_err(anyhow::Error::from)?;

    Ok(Snapshot {
        id,
        scan_id: scan.summary.scan_id.clone(),
        root_path,
        saved_at: Utc::now(),
        total_files: scan.summary.total_files,
        total_folders: scan.summary.total_folders,
        total_size_bytes: scan.summary.total_size_bytes,
        snapshot_type: SnapshotType::Scan,
        findings,
        extensions,
        scan_info,
        target_path: None,
        comparison: None,
        comparison_summary: None,
    })
}

fn build_comparison_snapshot(
    id: String,
    source_path: String,
    target_path: String,
    deep_scan: bool,
    report: ComparisonReport,
) -> Snapshot {
    let summary = &report.summary;
    let total_files =
        summary.identical + summary.modified + summary.missing_from_target + summary.extra_in_target;

    Snapshot {
        scan_id: id.clone(),
        id,
        root_path: source_path.clone(),
        saved_at: Utc::now(),
        total_files,
        total_folders: 0,
        total_size_bytes: summary.total_source_size,
        snapshot_type: SnapshotType::Comparison,
        findings: Vec::new(),
        extensions: Vec::new(),
        scan_info: json!({
            "source_path": source_path,
            "target_path": target_path,
            "deep_scan": deep_scan,
        }),
        target_path: Some(target_path),
        comparison_summary: Some(report.summary),
        comparison: Some(report.tree),
    }
}
