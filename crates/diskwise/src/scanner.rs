//! Recursive directory walker.
//!
//! A scan walks one root top-down, collecting a flat file list and a map of
//! per-folder aggregates, then propagates sizes and timestamps bottom-up so
//! every folder reflects its whole subtree. Individual stat failures are
//! swallowed: a scan never aborts because one entry was unreadable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::policy;

/// Emit progress at least every N files...
const PROGRESS_FILE_INTERVAL: u64 = 50;
/// ...or whenever this much wall clock has passed since the last emission.
const PROGRESS_TIME_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size_bytes: u64,
    /// Lowercased suffix including the leading dot, or empty.
    pub extension: String,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub accessed_at: Option<DateTime<Utc>>,
    /// Always a key of the scan's folder map.
    pub parent_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl FolderRecord {
    fn empty(path: String) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub root_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_files: u64,
    pub total_folders: u64,
    pub total_size_bytes: u64,
}

/// One throttled observation from a running scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub files_scanned: u64,
    pub folders_scanned: u64,
    pub bytes_scanned: u64,
    pub current_path: String,
    pub progress_percent: u8,
    pub elapsed_seconds: f64,
    pub message: String,
}

/// Everything one scan produced. Owned by the scan registry once complete.
#[derive(Debug, Clone)]
pub struct CompletedScan {
    pub files: Vec<FileRecord>,
    pub folders: HashMap<String, FolderRecord>,
    pub summary: ScanSummary,
}

pub struct Scanner {
    root: PathBuf,
    scan_id: String,
    progress: Option<mpsc::Sender<ScanProgress>>,
}

impl Scanner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            // Normalize away trailing separators and "." segments so folder
            // map keys line up with Path::parent of their children.
            root: root.as_ref().components().collect(),
            scan_id: format!("scan-{}", Uuid::new_v4()),
            progress: None,
        }
    }

    /// A scanner that streams throttled progress to `progress` while walking.
    /// Emission uses `blocking_send`, so the scan must run on a blocking
    /// thread; channel backpressure is what lets the receiving side keep up.
    pub fn with_progress<P: AsRef<Path>>(root: P, progress: mpsc::Sender<ScanProgress>) -> Self {
        Self {
            progress: Some(progress),
            ..Self::new(root)
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Walk the root and build the completed scan. Never fails: unreadable
    /// entries are skipped and an unreadable root yields an empty result
    /// that still contains the root folder.
    pub fn scan(&self) -> CompletedScan {
        let started_at = Utc::now();
        let walk_start = Instant::now();
        let mut last_emit = Instant::now();

        let mut files: Vec<FileRecord> = Vec::new();
        let mut folders: HashMap<String, FolderRecord> = HashMap::new();
        let mut bytes_scanned: u64 = 0;

        let root_key = self.root.to_string_lossy().to_string();
        folders.insert(root_key.clone(), FolderRecord::empty(root_key.clone()));

        let mut stack: Vec<PathBuf> = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let dir_key = dir.to_string_lossy().to_string();
            folders
                .entry(dir_key.clone())
                .or_insert_with(|| FolderRecord::empty(dir_key.clone()));

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(dir = %dir.display(), %err, "skipping unreadable directory");
                    continue;
                }
            };

            let mut subdirs: Vec<PathBuf> = Vec::new();
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(dir = %dir.display(), %err, "skipping unreadable entry");
                        continue;
                    }
                };
                let path = entry.path();
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        debug!(path = %path.display(), %err, "skipping entry without file type");
                        continue;
                    }
                };

                if file_type.is_dir() {
                    if policy::is_blacklisted(&path) {
                        debug!(path = %path.display(), "pruning blacklisted directory");
                        continue;
                    }
                    subdirs.push(path);
                } else if file_type.is_file() {
                    let metadata = match entry.metadata() {
                        Ok(metadata) => metadata,
                        Err(err) => {
                            debug!(path = %path.display(), %err, "skipping unreadable file");
                            continue;
                        }
                    };

                    let size = metadata.len();
                    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                    let accessed = metadata.accessed().ok().map(DateTime::<Utc>::from);
                    let created = metadata.created().ok().map(DateTime::<Utc>::from);

                    let folder = folders
                        .get_mut(&dir_key)
                        .expect("containing folder inserted on directory entry");
                    folder.total_size += size;
                    folder.file_count += 1;
                    folder.last_modified = max_timestamp(folder.last_modified, modified);
                    folder.last_accessed = max_timestamp(folder.last_accessed, accessed);

                    files.push(FileRecord {
                        path: path.to_string_lossy().to_string(),
                        size_bytes: size,
                        extension: file_extension(&path),
                        created_at: created,
                        modified_at: modified,
                        accessed_at: accessed,
                        parent_dir: dir_key.clone(),
                    });
                    bytes_scanned += size;

                    let files_scanned = files.len() as u64;
                    if files_scanned % PROGRESS_FILE_INTERVAL == 0
                        || last_emit.elapsed() >= PROGRESS_TIME_INTERVAL
                    {
                        self.emit_progress(
                            files_scanned,
                            folders.len() as u64,
                            bytes_scanned,
                            &dir,
                            walk_start,
                        );
                        last_emit = Instant::now();
                    }
                }
                // Symlinks and special files are neither counted nor followed.
            }

            // Reverse so the stack pops subdirectories in directory order.
            stack.extend(subdirs.into_iter().rev());
        }

        propagate_folder_totals(&mut folders);

        let summary = ScanSummary {
            scan_id: self.scan_id.clone(),
            root_path: root_key,
            started_at,
            completed_at: Utc::now(),
            total_files: files.len() as u64,
            total_folders: folders.len() as u64,
            total_size_bytes: bytes_scanned,
        };

        CompletedScan {
            files,
            folders,
            summary,
        }
    }

    fn emit_progress(
        &self,
        files_scanned: u64,
        folders_scanned: u64,
        bytes_scanned: u64,
        current_dir: &Path,
        walk_start: Instant,
    ) {
        let Some(tx) = &self.progress else {
            return;
        };

        let depth = current_dir
            .strip_prefix(&self.root)
            .map(|rel| rel.components().count())
            .unwrap_or(0);
        let progress_percent = (20 + depth * 5).min(95) as u8;
        let current_path = current_dir.to_string_lossy().to_string();

        let update = ScanProgress {
            files_scanned,
            folders_scanned,
            bytes_scanned,
            message: format!("Scanning {}", current_path),
            current_path,
            progress_percent,
            elapsed_seconds: walk_start.elapsed().as_secs_f64(),
        };

        // A closed receiver just means nobody is listening anymore; the
        // scan keeps going and still lands in the registry.
        let _ = tx.blocking_send(update);
    }
}

/// Render a byte count in the largest fitting unit.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn max_timestamp(
    current: Option<DateTime<Utc>>,
    candidate: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Single bottom-up pass rolling each folder's direct aggregates into its
/// parent. Requires that per-folder aggregates hold only direct-file
/// contributions when called; deepest folders go first so every child is
/// final before it is added to its parent.
fn propagate_folder_totals(folders: &mut HashMap<String, FolderRecord>) {
    let mut paths: Vec<String> = folders.keys().cloned().collect();
    paths.sort_by_key(|p| std::cmp::Reverse(separator_count(p)));

    for path in paths {
        let Some(parent) = Path::new(&path).parent() else {
            continue;
        };
        let parent_key = parent.to_string_lossy().to_string();
        if parent_key == path || !folders.contains_key(&parent_key) {
            continue;
        }

        let child = folders[&path].clone();
        let parent = folders
            .get_mut(&parent_key)
            .expect("parent presence checked above");
        parent.total_size += child.total_size;
        parent.file_count += child.file_count;
        parent.last_modified = max_timestamp(parent.last_modified, child.last_modified);
        parent.last_accessed = max_timestamp(parent.last_accessed, child.last_accessed);
    }
}

fn separator_count(path: &str) -> usize {
    path.matches(std::path::MAIN_SEPARATOR).count()
}
