//! Durable snapshot store backed by SQLite.
//!
//! Scan snapshots and comparison snapshots share one table; the comparison
//! variant additionally carries a target path, the comparison tree, and its
//! summary. Payloads are stored as JSON columns so a save/load round trip is
//! structurally lossless.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::analyzer::{ExtensionSummary, Finding};
use crate::compare::{ComparisonItem, ComparisonSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Scan,
    Comparison,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Comparison => "comparison",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "scan" => Ok(Self::Scan),
            "comparison" => Ok(Self::Comparison),
            other => bail!("unknown snapshot type '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub scan_id: String,
    pub root_path: String,
    pub saved_at: DateTime<Utc>,
    pub total_files: u64,
    pub total_folders: u64,
    pub total_size_bytes: u64,
    pub snapshot_type: SnapshotType,
    pub findings: Vec<Finding>,
    pub extensions: Vec<ExtensionSummary>,
    pub scan_info: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_summary: Option<ComparisonSummary>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a Database from an existing pool (useful for testing)
    #[doc(hidden)]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { pool })
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshots (
                id, scan_id, root_path, saved_at,
                total_files, total_folders, total_size_bytes,
                findings_json, extensions_json, scan_info_json,
                snapshot_type, target_path, comparison_json, comparison_summary_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.scan_id)
        .bind(&snapshot.root_path)
        .bind(snapshot.saved_at.to_rfc3339())
        .bind(snapshot.total_files as i64)
        .bind(snapshot.total_folders as i64)
        .bind(snapshot.total_size_bytes as i64)
        .bind(serde_json::to_string(&snapshot.findings)?)
        .bind(serde_json::to_string(&snapshot.extensions)?)
        .bind(serde_json::to_string(&snapshot.scan_info)?)
        .bind(snapshot.snapshot_type.as_str())
        .bind(snapshot.target_path.as_deref())
        .bind(json_column(snapshot.comparison.as_ref())?)
        .bind(json_column(snapshot.comparison_summary.as_ref())?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT id, scan_id, root_path, saved_at,
                    total_files, total_folders, total_size_bytes,
                    findings_json, extensions_json, scan_info_json,
                    snapshot_type, target_path, comparison_json, comparison_summary_json
             FROM snapshots WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_snapshot).transpose()
    }

    /// All snapshots, most recently saved first.
    pub async fn list(&self) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            "SELECT id, scan_id, root_path, saved_at,
                    total_files, total_folders, total_size_bytes,
                    findings_json, extensions_json, scan_info_json,
                    snapshot_type, target_path, comparison_json, comparison_summary_json
             FROM snapshots ORDER BY saved_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_snapshot).collect()
    }

    /// Overwrite the payload of an existing snapshot, keeping its id.
    pub async fn update(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            "UPDATE snapshots SET
                scan_id = ?, root_path = ?, saved_at = ?,
                total_files = ?, total_folders = ?, total_size_bytes = ?,
                findings_json = ?, extensions_json = ?, scan_info_json = ?,
                snapshot_type = ?, target_path = ?,
                comparison_json = ?, comparison_summary_json = ?
             WHERE id = ?",
        )
        .bind(&snapshot.scan_id)
        .bind(&snapshot.root_path)
        .bind(snapshot.saved_at.to_rfc3339())
        .bind(snapshot.total_files as i64)
        .bind(snapshot.total_folders as i64)
        .bind(snapshot.total_size_bytes as i64)
        .bind(serde_json::to_string(&snapshot.findings)?)
        .bind(serde_json::to_string(&snapshot.extensions)?)
        .bind(serde_json::to_string(&snapshot.scan_info)?)
        .bind(snapshot.snapshot_type.as_str())
        .bind(snapshot.target_path.as_deref())
        .bind(json_column(snapshot.comparison.as_ref())?)
        .bind(json_column(snapshot.comparison_summary.as_ref())?)
        .bind(&snapshot.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns whether a snapshot with this id existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM snapshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn json_column<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(|v| serde_json::to_string(v)).transpose().map_err(Into::into)
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<Snapshot> {
    let saved_at_str: String = row.get("saved_at");
    let snapshot_type: String = row.get("snapshot_type");
    let findings_json: String = row.get("findings_json");
    let extensions_json: String = row.get("extensions_json");
    let scan_info_json: String = row.get("scan_info_json");
    let comparison_json: Option<String> = row.get("comparison_json");
    let comparison_summary_json: Option<String> = row.get("comparison_summary_json");

    Ok(Snapshot {
        id: row.get("id"),
        scan_id: row.get("scan_id"),
        root_path: row.get("root_path"),
        saved_at: DateTime::parse_from_rfc3339(&saved_at_str)
            .context("invalid saved_at timestamp")?
            .with_timezone(&Utc),
        total_files: row.get::<i64, _>("total_files") as u64,
        total_folders: row.get::<i64, _>("total_folders") as u64,
        total_size_bytes: row.get::<i64, _>("total_size_bytes") as u64,
        snapshot_type: SnapshotType::parse(&snapshot_type)?,
        findings: serde_json::from_str(&findings_json)?,
        extensions: serde_json::from_str(&extensions_json)?,
        scan_info: serde_json::from_str(&scan_info_json)?,
        target_path: row.get("target_path"),
        comparison: comparison_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        comparison_summary: comparison_summary_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}
