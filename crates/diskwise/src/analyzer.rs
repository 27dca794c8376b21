//! Heuristic passes over a completed scan.
//!
//! Each pass inspects the scan's folder map or file list and emits findings
//! about reclaimable or suspicious storage. Findings are numbered in
//! emission order within one `analyze` call. Duplicate detection here is a
//! name-and-size heuristic only; content hashing belongs to the comparator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::policy;
use crate::scanner::{CompletedScan, FileRecord, FolderRecord};

pub const LARGE_FOLDER_THRESHOLD: u64 = 1024 * 1024 * 1024;
pub const OLD_DAYS_THRESHOLD: i64 = 365;
pub const RECENT_DAYS_THRESHOLD: i64 = 7;
pub const TOP_N_LARGE: usize = 20;

/// Folders below this size never count as duplicate-folder candidates.
const DUPLICATE_FOLDER_MIN_BYTES: u64 = 10 * 1024 * 1024;
/// Files at or below this size never count as duplicate-file candidates.
const DUPLICATE_FILE_MIN_BYTES: u64 = 1024 * 1024;
/// Two folders cluster when their sizes differ by at most this fraction of
/// the cluster's largest member.
const SIZE_SIMILARITY: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    LargeFolder,
    OldLargeFolder,
    ActiveLargeFolder,
    CacheCandidate,
    DuplicateFolderCandidate,
    DuplicateFileCandidate,
    ColdArchiveCandidate,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LargeFolder => "large_folder",
            Self::OldLargeFolder => "old_large_folder",
            Self::ActiveLargeFolder => "active_large_folder",
            Self::CacheCandidate => "cache_candidate",
            Self::DuplicateFolderCandidate => "duplicate_folder_candidate",
            Self::DuplicateFileCandidate => "duplicate_file_candidate",
            Self::ColdArchiveCandidate => "cold_archive_candidate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub category: FindingCategory,
    pub reason: String,
    pub paths: Vec<String>,
    /// Total size for single-target categories; reclaimable (all-but-one)
    /// bytes for duplicate categories.
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSummary {
    pub extension: String,
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Run every heuristic pass over a completed scan, in a fixed order, and
/// return the findings numbered `finding-1..finding-N`.
pub fn analyze(scan: &CompletedScan) -> Vec<Finding> {
    let mut findings = Vec::new();

    find_large_folders(&scan.folders, &mut findings);
    find_stale_large_folders(&scan.folders, &mut findings);
    find_cache_folders(&scan.folders, &mut findings);
    find_duplicate_folders(&scan.folders, &mut findings);
    find_duplicate_files(&scan.files, &mut findings);
    find_cold_archives(&scan.folders, &mut findings);

    for (index, finding) in findings.iter_mut().enumerate() {
        finding.id = format!("finding-{}", index + 1);
    }
    findings
}

fn find_large_folders(folders: &HashMap<String, FolderRecord>, findings: &mut Vec<Finding>) {
    let mut large: Vec<&FolderRecord> = folders
        .values()
        .filter(|f| f.total_size >= LARGE_FOLDER_THRESHOLD)
        .collect();
    large.sort_by(|a, b| b.total_size.cmp(&a.total_size).then(a.path.cmp(&b.path)));

    for folder in large.into_iter().take(TOP_N_LARGE) {
        findings.push(Finding {
            id: String::new(),
            category: FindingCategory::LargeFolder,
            reason: format!(
                "Folder is {:.1} GB ({} files)",
                gb(folder.total_size),
                folder.file_count
            ),
            paths: vec![folder.path.clone()],
            total_bytes: folder.total_size,
        });
    }
}

fn find_stale_large_folders(folders: &HashMap<String, FolderRecord>, findings: &mut Vec<Finding>) {
    let now = chrono::Utc::now();
    for folder in sorted_by_path(folders) {
        if folder.total_size < LARGE_FOLDER_THRESHOLD {
            continue;
        }
        let Some(modified) = folder.last_modified else {
            continue;
        };
        let days_old = (now - modified).num_days();

        if days_old > OLD_DAYS_THRESHOLD {
            findings.push(Finding {
                id: String::new(),
                category: FindingCategory::OldLargeFolder,
                reason: format!(
                    "Folder is {:.1} GB and last modified {} days ago",
                    gb(folder.total_size),
                    days_old
                ),
                paths: vec![folder.path.clone()],
                total_bytes: folder.total_size,
            });
        } else if days_old <= RECENT_DAYS_THRESHOLD
            && folder.total_size >= 2 * LARGE_FOLDER_THRESHOLD
        {
            findings.push(Finding {
                id: String::new(),
                category: FindingCategory::ActiveLargeFolder,
                reason: format!(
                    "Folder is {:.1} GB and actively modified ({} days ago)",
                    gb(folder.total_size),
                    days_old
                ),
                paths: vec![folder.path.clone()],
                total_bytes: folder.total_size,
            });
        }
    }
}

fn find_cache_folders(folders: &HashMap<String, FolderRecord>, findings: &mut Vec<Finding>) {
    for folder in sorted_by_path(folders) {
        if folder.total_size > 0 && policy::is_cache_folder(Path::new(&folder.path)) {
            findings.push(Finding {
                id: String::new(),
                category: FindingCategory::CacheCandidate,
                reason: format!("Cache folder holding {:.1} MB", mb(folder.total_size)),
                paths: vec![folder.path.clone()],
                total_bytes: folder.total_size,
            });
        }
    }
}

/// Folders sharing a basename cluster when their sizes are within 10% of the
/// cluster's largest member; each cluster of two or more is one candidate.
fn find_duplicate_folders(folders: &HashMap<String, FolderRecord>, findings: &mut Vec<Finding>) {
    let mut by_name: HashMap<String, Vec<&FolderRecord>> = HashMap::new();
    for folder in folders.values() {
        if folder.total_size <= DUPLICATE_FOLDER_MIN_BYTES {
            continue;
        }
        if let Some(name) = Path::new(&folder.path).file_name() {
            by_name
                .entry(name.to_string_lossy().to_lowercase())
                .or_default()
                .push(folder);
        }
    }

    let mut names: Vec<&String> = by_name.keys().collect();
    names.sort();

    for name in names {
        let mut members = by_name[name].clone();
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| b.total_size.cmp(&a.total_size).then(a.path.cmp(&b.path)));

        let mut clusters: Vec<Vec<&FolderRecord>> = Vec::new();
        for folder in members {
            let slot = clusters.iter_mut().find(|cluster| {
                let anchor = cluster[0].total_size as f64;
                (anchor - folder.total_size as f64) / anchor <= SIZE_SIMILARITY
            });
            match slot {
                Some(cluster) => cluster.push(folder),
                None => clusters.push(vec![folder]),
            }
        }

        for cluster in clusters.into_iter().filter(|c| c.len() >= 2) {
            let total: u64 = cluster.iter().map(|f| f.total_size).sum();
            let largest = cluster[0].total_size;
            findings.push(Finding {
                id: String::new(),
                category: FindingCategory::DuplicateFolderCandidate,
                reason: format!(
                    "{} similarly sized folders named '{}' ({:.1} GB reclaimable)",
                    cluster.len(),
                    name,
                    gb(total - largest)
                ),
                paths: cluster.iter().map(|f| f.path.clone()).collect(),
                total_bytes: total - largest,
            });
        }
    }
}

fn find_duplicate_files(files: &[FileRecord], findings: &mut Vec<Finding>) {
    let mut by_key: HashMap<(String, u64), Vec<&FileRecord>> = HashMap::new();
    for file in files {
        if file.size_bytes <= DUPLICATE_FILE_MIN_BYTES {
            continue;
        }
        if let Some(name) = Path::new(&file.path).file_name() {
            by_key
                .entry((name.to_string_lossy().to_string(), file.size_bytes))
                .or_default()
                .push(file);
        }
    }

    let mut keys: Vec<&(String, u64)> = by_key.keys().collect();
    keys.sort();

    for key in keys {
        let group = &by_key[key];
        if group.len() < 2 {
            continue;
        }
        let (name, size) = key;
        let mut paths: Vec<String> = group.iter().map(|f| f.path.clone()).collect();
        paths.sort();
        findings.push(Finding {
            id: String::new(),
            category: FindingCategory::DuplicateFileCandidate,
            reason: format!("{} copies of '{}' ({:.1} MB each)", group.len(), name, mb(*size)),
            paths,
            total_bytes: size * (group.len() as u64 - 1),
        });
    }
}

fn find_cold_archives(folders: &HashMap<String, FolderRecord>, findings: &mut Vec<Finding>) {
    let now = chrono::Utc::now();
    for folder in sorted_by_path(folders) {
        if folder.total_size < LARGE_FOLDER_THRESHOLD {
            continue;
        }
        let Some(accessed) = folder.last_accessed else {
            continue;
        };
        let days_idle = (now - accessed).num_days();
        if days_idle > OLD_DAYS_THRESHOLD {
            findings.push(Finding {
                id: String::new(),
                category: FindingCategory::ColdArchiveCandidate,
                reason: format!(
                    "Folder is {:.1} GB and last accessed {} days ago",
                    gb(folder.total_size),
                    days_idle
                ),
                paths: vec![folder.path.clone()],
                total_bytes: folder.total_size,
            });
        }
    }
}

/// Roll files up by extension, largest total first. The empty extension is
/// reported as the literal `(no extension)`.
pub fn extension_summary(files: &[FileRecord]) -> Vec<ExtensionSummary> {
    let mut by_extension: HashMap<&str, (u64, u64)> = HashMap::new();
    for file in files {
        let key = if file.extension.is_empty() {
            "(no extension)"
        } else {
            &file.extension
        };
        let entry = by_extension.entry(key).or_default();
        entry.0 += 1;
        entry.1 += file.size_bytes;
    }

    let mut summary: Vec<ExtensionSummary> = by_extension
        .into_iter()
        .map(|(extension, (file_count, total_bytes))| ExtensionSummary {
            extension: extension.to_string(),
            file_count,
            total_bytes,
        })
        .collect();
    summary.sort_by(|a, b| {
        b.total_bytes
            .cmp(&a.total_bytes)
            .then(a.extension.cmp(&b.extension))
    });
    summary
}

fn sorted_by_path(folders: &HashMap<String, FolderRecord>) -> Vec<&FolderRecord> {
    let mut sorted: Vec<&FolderRecord> = folders.values().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    sorted
}

fn gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
