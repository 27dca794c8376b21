//! Two-tree comparison.
//!
//! Both roots are indexed by relative path, every entry in the union of the
//! two indices is classified, and the classified items are assembled into a
//! single rooted tree with difference counts propagated to every ancestor.
//! Deep mode disambiguates same-size files with SHA-256 digests; a file the
//! comparator cannot read keeps whatever verdict its metadata produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::policy;

const HASH_BLOCK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Identical,
    Modified,
    MissingFromTarget,
    ExtraInTarget,
}

/// One node of the comparison tree. `children` is present only on folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonItem {
    pub name: String,
    pub relative_path: String,
    pub item_type: ItemType,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ComparisonItem>>,
    /// Non-identical descendants (files and folders) below this item.
    pub difference_count: u64,
}

/// File-level counters plus size accumulation over every indexed entry
/// (directories contribute zero bytes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub identical: u64,
    pub modified: u64,
    pub missing_from_target: u64,
    pub extra_in_target: u64,
    pub total_source_size: u64,
    pub total_target_size: u64,
    pub deep_scan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub tree: ComparisonItem,
    pub summary: ComparisonSummary,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    full_path: PathBuf,
    size: u64,
    modified: Option<DateTime<Utc>>,
    is_dir: bool,
}

/// Compare two directory trees. Both paths must be directories; per-entry
/// walk and read failures are absorbed.
pub fn compare_trees(source: &Path, target: &Path, deep_scan: bool) -> ComparisonReport {
    let (source_index, target_index) =
        rayon::join(|| index_tree(source), || index_tree(target));

    let mut summary = ComparisonSummary {
        deep_scan,
        ..ComparisonSummary::default()
    };
    let mut items: BTreeMap<String, ComparisonItem> = BTreeMap::new();

    let union: Vec<&String> = {
        let mut keys: Vec<&String> = source_index.keys().chain(target_index.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    };

    for rel in union {
        let item = match (source_index.get(rel), target_index.get(rel)) {
            (Some(src), Some(dst)) => {
                summary.total_source_size += src.size;
                summary.total_target_size += dst.size;
                let (item_type, status) = if src.is_dir && dst.is_dir {
                    // Tentative: child propagation may upgrade to modified.
                    (ItemType::Folder, ItemStatus::Identical)
                } else if !src.is_dir && !dst.is_dir {
                    let status = compare_files(src, dst, deep_scan);
                    count_file_status(&mut summary, status);
                    (ItemType::File, status)
                } else {
                    // A file on one side shadows a folder on the other.
                    let item_type = if src.is_dir {
                        ItemType::Folder
                    } else {
                        ItemType::File
                    };
                    if item_type == ItemType::File {
                        count_file_status(&mut summary, ItemStatus::Modified);
                    }
                    (item_type, ItemStatus::Modified)
                };
                make_item(rel, item_type, status, Some(src), Some(dst))
            }
            (Some(src), None) => {
                summary.total_source_size += src.size;
                let item_type = if src.is_dir {
                    ItemType::Folder
                } else {
                    summary.missing_from_target += 1;
                    ItemType::File
                };
                make_item(rel, item_type, ItemStatus::MissingFromTarget, Some(src), None)
            }
            (None, Some(dst)) => {
                summary.total_target_size += dst.size;
                let item_type = if dst.is_dir {
                    ItemType::Folder
                } else {
                    summary.extra_in_target += 1;
                    ItemType::File
                };
                make_item(rel, item_type, ItemStatus::ExtraInTarget, None, Some(dst))
            }
            (None, None) => unreachable!("union key missing from both indices"),
        };
        items.insert(rel.clone(), item);
    }

    propagate_difference_counts(&mut items);
    let mut tree = assemble_tree(items);
    if tree.name.is_empty() {
        tree.name = display_name(source);
    }

    ComparisonReport { tree, summary }
}

/// Map every entry under `root` (and the root itself, keyed by the empty
/// relative path) to its metadata. Blacklisted directories are pruned;
/// directory symlinks are not followed.
fn index_tree(root: &Path) -> BTreeMap<String, IndexEntry> {
    let mut index = BTreeMap::new();
    index.insert(
        String::new(),
        IndexEntry {
            full_path: root.to_path_buf(),
            size: 0,
            modified: fs::metadata(root).ok().and_then(|m| m.modified().ok()).map(Into::into),
            is_dir: true,
        },
    );

    // Prune directories only, as the scanner does; files are never tested
    // against the blacklist themselves.
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !entry.file_type().is_dir() || !policy::is_blacklisted(entry.path())
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, "skipping unreadable entry during comparison walk");
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().to_string();
        let is_dir = entry.file_type().is_dir();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %entry.path().display(), %err, "skipping entry without metadata");
                continue;
            }
        };

        index.insert(
            rel,
            IndexEntry {
                full_path: entry.path().to_path_buf(),
                size: if is_dir { 0 } else { metadata.len() },
                modified: metadata.modified().ok().map(Into::into),
                is_dir,
            },
        );
    }
    index
}

/// Size is the primary evidence, timestamps second; deep mode brings in
/// content digests. A missing digest never flips the metadata verdict.
fn compare_files(src: &IndexEntry, dst: &IndexEntry, deep_scan: bool) -> ItemStatus {
    if src.size != dst.size {
        return ItemStatus::Modified;
    }

    let timestamps_agree = src.modified == dst.modified;
    if !deep_scan {
        return if timestamps_agree {
            ItemStatus::Identical
        } else {
            ItemStatus::Modified
        };
    }

    match (hash_file(&src.full_path), hash_file(&dst.full_path)) {
        (Some(a), Some(b)) if a == b => ItemStatus::Identical,
        (Some(_), Some(_)) => ItemStatus::Modified,
        _ if timestamps_agree => ItemStatus::Identical,
        _ => ItemStatus::Modified,
    }
}

/// SHA-256 over the file contents in 8 KiB blocks, or None if any read fails.
fn hash_file(path: &Path) -> Option<String> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), %err, "cannot open file for hashing");
            return None;
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BLOCK_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(err) => {
                debug!(path = %path.display(), %err, "read failed while hashing");
                return None;
            }
        }
    }
    Some(format!("{:x}", hasher.finalize()))
}

fn make_item(
    rel: &str,
    item_type: ItemType,
    status: ItemStatus,
    src: Option<&IndexEntry>,
    dst: Option<&IndexEntry>,
) -> ComparisonItem {
    let name = Path::new(rel)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    ComparisonItem {
        name,
        relative_path: rel.to_string(),
        item_type,
        status,
        source_size: src.map(|e| e.size),
        target_size: dst.map(|e| e.size),
        source_modified: src.and_then(|e| e.modified),
        target_modified: dst.and_then(|e| e.modified),
        children: match item_type {
            ItemType::Folder => Some(Vec::new()),
            ItemType::File => None,
        },
        difference_count: 0,
    }
}

fn count_file_status(summary: &mut ComparisonSummary, status: ItemStatus) {
    match status {
        ItemStatus::Identical => summary.identical += 1,
        ItemStatus::Modified => summary.modified += 1,
        ItemStatus::MissingFromTarget => summary.missing_from_target += 1,
        ItemStatus::ExtraInTarget => summary.extra_in_target += 1,
    }
}

/// Deepest items first, so each child's own count is final before it is
/// added to its parent. A non-identical child (or one with differences
/// below it) contributes itself plus its subtree, and flips a parent that
/// still looks identical to modified.
fn propagate_difference_counts(items: &mut BTreeMap<String, ComparisonItem>) {
    let mut order: Vec<String> = items.keys().filter(|k| !k.is_empty()).cloned().collect();
    order.sort_by_key(|path| Reverse(Path::new(path).components().count()));

    for path in order {
        let (non_identical, count) = {
            let item = &items[&path];
            (item.status != ItemStatus::Identical, item.difference_count)
        };
        if !non_identical && count == 0 {
            continue;
        }
        let parent_key = parent_of(&path);
        if let Some(parent) = items.get_mut(&parent_key) {
            parent.difference_count += 1 + count;
            if parent.status == ItemStatus::Identical {
                parent.status = ItemStatus::Modified;
            }
        }
    }
}

/// Rebuild the tree from the flat item map. Children are attached in
/// ascending relative-path order, which the sorted map provides.
fn assemble_tree(mut items: BTreeMap<String, ComparisonItem>) -> ComparisonItem {
    let mut children_of: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in items.keys().filter(|k| !k.is_empty()) {
        children_of
            .entry(parent_of(path))
            .or_default()
            .push(path.clone());
    }

    fn build(
        key: &str,
        items: &mut BTreeMap<String, ComparisonItem>,
        children_of: &BTreeMap<String, Vec<String>>,
    ) -> ComparisonItem {
        let mut item = items.remove(key).expect("item present for its own key");
        if item.item_type == ItemType::Folder {
            let mut children = Vec::new();
            if let Some(child_keys) = children_of.get(key) {
                for child_key in child_keys {
                    children.push(build(child_key, items, children_of));
                }
            }
            item.children = Some(children);
        }
        item
    }

    build("", &mut items, &children_of)
}

fn parent_of(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
