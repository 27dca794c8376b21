use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tempfile::TempDir;
use tower::ServiceExt;

use diskwise::api::{router, AppState};
use diskwise::db::Database;

/// Temp trees for cache-detection tests live under the crate directory: the
/// usual system temp location sits below a `tmp` segment, which the cache
/// heuristic deliberately flags.
fn neutral_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("diskwise-test-")
        .tempdir_in(env!("CARGO_MANIFEST_DIR"))
        .unwrap()
}

/// A file of the given logical size without materializing its content.
fn sized_file(path: &Path, len: u64) {
    let file = fs::File::create(path).unwrap();
    file.set_len(len).unwrap();
}

async fn test_state() -> AppState {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            scan_id TEXT NOT NULL,
            root_path TEXT NOT NULL,
            saved_at TEXT NOT NULL,
            total_files INTEGER NOT NULL DEFAULT 0,
            total_folders INTEGER NOT NULL DEFAULT 0,
            total_size_bytes INTEGER NOT NULL DEFAULT 0,
            findings_json TEXT NOT NULL,
            extensions_json TEXT NOT NULL,
            scan_info_json TEXT NOT NULL,
            snapshot_type TEXT NOT NULL DEFAULT 'scan' CHECK(snapshot_type IN ('scan', 'comparison')),
            target_path TEXT,
            comparison_json TEXT,
            comparison_summary_json TEXT
        );
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    AppState::new(Database::from_pool(pool))
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn send_empty(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn scan_root(app: &Router, root: &Path) -> Value {
    let (status, body) = send_json(
        app,
        "POST",
        "/api/scan",
        json!({ "root_path": root.to_string_lossy() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_basic_scan_and_extension_summary() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("a.txt"), vec![0u8; 100]).unwrap();
    fs::write(root.join("b.log"), vec![0u8; 200]).unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/c.txt"), vec![0u8; 700]).unwrap();

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;

    assert_eq!(summary["total_files"], 3);
    assert_eq!(summary["total_folders"], 2);
    assert_eq!(summary["total_size_bytes"], 1000);

    let scan_id = summary["scan_id"].as_str().unwrap();
    let (status, extensions) =
        get_json(&app, &format!("/api/extensions-summary?scan_id={scan_id}")).await;
    assert_eq!(status, StatusCode::OK);

    let extensions = extensions.as_array().unwrap();
    assert_eq!(extensions.len(), 2);
    assert_eq!(extensions[0]["extension"], ".txt");
    assert_eq!(extensions[0]["file_count"], 2);
    assert_eq!(extensions[0]["total_bytes"], 800);
    assert_eq!(extensions[1]["extension"], ".log");
    assert_eq!(extensions[1]["total_bytes"], 200);
}

#[tokio::test]
async fn test_blacklisted_child_is_pruned() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir(root.join("System Volume Information")).unwrap();
    fs::write(
        root.join("System Volume Information/secret.bin"),
        vec![0u8; 64],
    )
    .unwrap();
    fs::write(root.join("normal.txt"), b"data").unwrap();

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;

    assert_eq!(summary["total_files"], 1);
    assert_eq!(summary["total_folders"], 1);
    assert_eq!(summary["total_size_bytes"], 4);
}

#[tokio::test]
async fn test_cache_candidate_detection() {
    let temp_dir = neutral_temp_dir();
    let root = temp_dir.path();
    fs::create_dir(root.join("node_modules")).unwrap();
    sized_file(&root.join("node_modules/big.bin"), 5 * 1024 * 1024);
    fs::create_dir(root.join("src")).unwrap();
    fs::write(root.join("src/main.c"), vec![0u8; 1024]).unwrap();

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;
    let scan_id = summary["scan_id"].as_str().unwrap();

    let (status, findings) = get_json(
        &app,
        &format!("/api/findings?scan_id={scan_id}&category=cache_candidate"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let findings = findings.as_array().unwrap();
    assert_eq!(findings.len(), 1);
    let paths = findings[0]["paths"].as_array().unwrap();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].as_str().unwrap().ends_with("node_modules"));
    assert_eq!(findings[0]["total_bytes"], 5 * 1024 * 1024);
}

#[tokio::test]
async fn test_duplicate_file_candidates() {
    let temp_dir = neutral_temp_dir();
    let root = temp_dir.path();
    for dir in ["x", "y", "z"] {
        fs::create_dir(root.join(dir)).unwrap();
    }
    sized_file(&root.join("x/video.mp4"), 2 * 1024 * 1024);
    sized_file(&root.join("y/video.mp4"), 2 * 1024 * 1024);
    // Exactly 1 MiB: not strictly over the floor, so never a candidate.
    sized_file(&root.join("z/video.mp4"), 1024 * 1024);

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;
    let scan_id = summary["scan_id"].as_str().unwrap();

    let (_, findings) = get_json(
        &app,
        &format!("/api/findings?scan_id={scan_id}&category=duplicate_file_candidate"),
    )
    .await;

    let findings = findings.as_array().unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0]["paths"].as_array().unwrap().len(), 2);
    assert_eq!(findings[0]["total_bytes"], 2 * 1024 * 1024);
}

#[tokio::test]
async fn test_duplicate_folder_clustering_by_size() {
    const MIB: u64 = 1024 * 1024;
    let temp_dir = neutral_temp_dir();
    let root = temp_dir.path();
    for (parent, size) in [("a", 100 * MIB), ("b", 105 * MIB), ("c", 200 * MIB)] {
        fs::create_dir_all(root.join(parent).join("backup")).unwrap();
        sized_file(&root.join(parent).join("backup/data.bin"), size);
    }

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;
    let scan_id = summary["scan_id"].as_str().unwrap();

    let (_, findings) = get_json(
        &app,
        &format!("/api/findings?scan_id={scan_id}&category=duplicate_folder_candidate"),
    )
    .await;

    // 200 MiB is nearly 50% away from 105 and stands alone; 100 is within
    // 10% of 105 and joins it. Reclaimable: the smaller of the pair.
    let findings = findings.as_array().unwrap();
    assert_eq!(findings.len(), 1);
    let paths: Vec<&str> = findings[0]["paths"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with("b/backup"));
    assert!(paths[1].ends_with("a/backup"));
    assert_eq!(findings[0]["total_bytes"], 100 * MIB);
}

#[tokio::test]
async fn test_findings_ids_are_contiguous_and_filterable() {
    let temp_dir = neutral_temp_dir();
    let root = temp_dir.path();
    fs::create_dir(root.join(".cache")).unwrap();
    fs::write(root.join(".cache/blob"), vec![0u8; 2048]).unwrap();
    for dir in ["m", "n"] {
        fs::create_dir(root.join(dir)).unwrap();
        sized_file(&root.join(dir).join("copy.iso"), 3 * 1024 * 1024);
    }

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;
    let scan_id = summary["scan_id"].as_str().unwrap();

    let (_, findings) = get_json(&app, &format!("/api/findings?scan_id={scan_id}")).await;
    let findings = findings.as_array().unwrap();
    assert!(findings.len() >= 2);
    for (index, finding) in findings.iter().enumerate() {
        assert_eq!(
            finding["id"].as_str().unwrap(),
            format!("finding-{}", index + 1)
        );
    }

    let (_, filtered) = get_json(
        &app,
        &format!("/api/findings?scan_id={scan_id}&category=cache_candidate"),
    )
    .await;
    assert!(filtered
        .as_array()
        .unwrap()
        .iter()
        .all(|f| f["category"] == "cache_candidate"));
}

#[tokio::test]
async fn test_compare_shallow_vs_deep_over_http() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    fs::write(source.path().join("doc.txt"), b"a").unwrap();
    fs::write(target.path().join("doc.txt"), b"a").unwrap();

    // Same content, different mtimes.
    let early = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    let late = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_100_000);
    fs::File::options()
        .write(true)
        .open(source.path().join("doc.txt"))
        .unwrap()
        .set_modified(early)
        .unwrap();
    fs::File::options()
        .write(true)
        .open(target.path().join("doc.txt"))
        .unwrap()
        .set_modified(late)
        .unwrap();

    let app = router(test_state().await);
    let request = |deep: bool| {
        json!({
            "source_path": source.path().to_string_lossy(),
            "target_path": target.path().to_string_lossy(),
            "deep_scan": deep,
        })
    };

    let (status, shallow) = send_json(&app, "POST", "/api/compare", request(false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shallow["summary"]["modified"], 1);
    assert_eq!(shallow["tree"]["status"], "modified");
    assert_eq!(shallow["tree"]["difference_count"], 1);
    assert_eq!(shallow["tree"]["children"][0]["status"], "modified");

    let (status, deep) = send_json(&app, "POST", "/api/compare", request(true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deep["summary"]["identical"], 1);
    assert_eq!(deep["tree"]["status"], "identical");
    assert_eq!(deep["tree"]["difference_count"], 0);
    assert_eq!(deep["tree"]["children"][0]["status"], "identical");
}

#[tokio::test]
async fn test_compare_counters_cover_file_union() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    fs::write(source.path().join("same.txt"), b"s").unwrap();
    fs::write(target.path().join("same.txt"), b"t").unwrap();
    fs::write(source.path().join("gone.txt"), b"x").unwrap();
    fs::create_dir(target.path().join("fresh")).unwrap();
    fs::write(target.path().join("fresh/new.txt"), b"y").unwrap();

    let app = router(test_state().await);
    let (_, body) = send_json(
        &app,
        "POST",
        "/api/compare",
        json!({
            "source_path": source.path().to_string_lossy(),
            "target_path": target.path().to_string_lossy(),
        }),
    )
    .await;

    let summary = &body["summary"];
    let counted = summary["identical"].as_u64().unwrap()
        + summary["modified"].as_u64().unwrap()
        + summary["missing_from_target"].as_u64().unwrap()
        + summary["extra_in_target"].as_u64().unwrap();
    // Three distinct files across both trees.
    assert_eq!(counted, 3);
    assert_eq!(summary["extra_in_target"], 1);
    assert_eq!(summary["missing_from_target"], 1);

    // The folder holding the extra file is itself extra, and its parent
    // count covers both it and the file below it.
    let fresh = body["tree"]["children"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "fresh")
        .unwrap()
        .clone();
    assert_eq!(fresh["status"], "extra_in_target");
    assert_eq!(fresh["difference_count"], 1);
}

#[tokio::test]
async fn test_snapshot_lifecycle_over_http() {
    let temp_dir = neutral_temp_dir();
    let root = temp_dir.path();
    fs::create_dir(root.join("node_modules")).unwrap();
    sized_file(&root.join("node_modules/dep.js"), 2 * 1024 * 1024);
    fs::write(root.join("app.py"), b"print()").unwrap();

    let app = router(test_state().await);
    let summary = scan_root(&app, root).await;
    let scan_id = summary["scan_id"].as_str().unwrap().to_string();

    // Save.
    let (status, saved) = send_json(
        &app,
        "POST",
        "/api/snapshots",
        json!({ "scan_id": scan_id, "root_path": root.to_string_lossy() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let snapshot_id = saved["id"].as_str().unwrap().to_string();
    assert!(snapshot_id.starts_with("snapshot-"));
    assert_eq!(saved["snapshot_type"], "scan");
    assert_eq!(saved["total_files"], 2);

    // Load: payload survives the round trip structurally intact.
    let (status, loaded) = get_json(&app, &format!("/api/snapshots/{snapshot_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loaded["findings"], saved["findings"]);
    assert_eq!(loaded["extensions"], saved["extensions"]);
    assert_eq!(loaded["scan_info"], saved["scan_info"]);

    // List.
    let (_, listed) = get_json(&app, "/api/snapshots").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"].as_str().unwrap(), snapshot_id);

    // Refresh after the tree changed on disk.
    fs::write(root.join("extra.py"), b"pass").unwrap();
    let (status, refreshed) = send_empty(&app, "PUT", &format!("/api/snapshots/{snapshot_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["id"].as_str().unwrap(), snapshot_id);
    assert_eq!(refreshed["total_files"], 3);
    assert_ne!(refreshed["scan_id"], saved["scan_id"]);

    // Delete, then the id is gone.
    let (status, deleted) = send_empty(&app, "DELETE", &format!("/api/snapshots/{snapshot_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["status"], "deleted");
    let (status, _) = get_json(&app, &format!("/api/snapshots/{snapshot_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_snapshot_refresh_with_stale_root() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("f.txt"), b"x").unwrap();

    let app = router(test_state().await);
    let summary = scan_root(&app, temp_dir.path()).await;
    let scan_id = summary["scan_id"].as_str().unwrap().to_string();

    let (_, saved) = send_json(
        &app,
        "POST",
        "/api/snapshots",
        json!({ "scan_id": scan_id, "root_path": temp_dir.path().to_string_lossy() }),
    )
    .await;
    let snapshot_id = saved["id"].as_str().unwrap().to_string();

    // The root vanishes before the refresh.
    drop(temp_dir);
    let (status, body) = send_empty(&app, "PUT", &format!("/api/snapshots/{snapshot_id}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("stale root"));
}

#[tokio::test]
async fn test_comparison_snapshot_lifecycle() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    fs::write(source.path().join("keep.txt"), b"same").unwrap();
    fs::write(target.path().join("keep.txt"), b"diff-size").unwrap();

    let app = router(test_state().await);
    let uri = format!(
        "/api/snapshots/comparison?source_path={}&target_path={}&deep_scan=false",
        source.path().to_string_lossy(),
        target.path().to_string_lossy()
    );
    let (status, saved) = send_empty(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);

    let snapshot_id = saved["id"].as_str().unwrap().to_string();
    assert!(snapshot_id.starts_with("comparison-"));
    assert_eq!(saved["snapshot_type"], "comparison");
    assert_eq!(saved["comparison_summary"]["modified"], 1);
    assert_eq!(
        saved["target_path"].as_str().unwrap(),
        target.path().to_string_lossy()
    );

    // Converge the trees, then refresh re-runs the stored comparison.
    fs::write(target.path().join("keep.txt"), b"same").unwrap();
    let early = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    for root in [source.path(), target.path()] {
        fs::File::options()
            .write(true)
            .open(root.join("keep.txt"))
            .unwrap()
            .set_modified(early)
            .unwrap();
    }

    let (status, refreshed) = send_empty(
        &app,
        "PUT",
        &format!("/api/snapshots/comparison/{snapshot_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["comparison_summary"]["identical"], 1);
    assert_eq!(refreshed["comparison_summary"]["modified"], 0);

    // The generic scan refresh refuses comparison snapshots.
    let (status, body) = send_empty(&app, "PUT", &format!("/api/snapshots/{snapshot_id}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("comparison snapshot"));
}

#[tokio::test]
async fn test_comparison_refresh_rejects_scan_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("f.txt"), b"x").unwrap();

    let app = router(test_state().await);
    let summary = scan_root(&app, temp_dir.path()).await;
    let scan_id = summary["scan_id"].as_str().unwrap().to_string();

    let (_, saved) = send_json(
        &app,
        "POST",
        "/api/snapshots",
        json!({ "scan_id": scan_id, "root_path": temp_dir.path().to_string_lossy() }),
    )
    .await;
    let snapshot_id = saved["id"].as_str().unwrap();

    let (status, _) = send_empty(
        &app,
        "PUT",
        &format!("/api/snapshots/comparison/{snapshot_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scan_stream_emits_progress_then_complete() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    for i in 0..60 {
        fs::write(root.join(format!("file{i:02}.dat")), vec![0u8; 16]).unwrap();
    }

    let app = router(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/scan/stream?root_path={}",
                    root.to_string_lossy()
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let frames: Vec<Value> = text
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            let data = chunk
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("frame without data prefix: {chunk}"));
            serde_json::from_str(data).unwrap()
        })
        .collect();

    assert!(frames.len() >= 2, "expected progress plus completion");
    let progress = &frames[0];
    assert_eq!(progress["event_type"], "progress");
    assert_eq!(progress["files_scanned"], 50);
    assert_eq!(progress["progress_percent"], 20);
    assert!(progress["scan_id"].as_str().unwrap().starts_with("scan-"));

    let complete = frames.last().unwrap();
    assert_eq!(complete["event_type"], "complete");
    assert_eq!(complete["scan_response"]["total_files"], 60);
    assert_eq!(complete["scan_id"], progress["scan_id"]);

    // Every progress frame precedes the terminal event.
    assert!(frames[..frames.len() - 1]
        .iter()
        .all(|f| f["event_type"] == "progress"));
}
