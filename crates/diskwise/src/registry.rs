//! Process-local retention of completed scans.
//!
//! Scans are inserted once, after completion, and then only read. Nothing is
//! evicted for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::scanner::CompletedScan;

#[derive(Clone, Default)]
pub struct ScanRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<CompletedScan>>>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain a completed scan under its own scan id.
    pub fn insert(&self, scan: CompletedScan) -> Arc<CompletedScan> {
        let scan = Arc::new(scan);
        self.inner
            .write()
            .unwrap()
            .insert(scan.summary.scan_id.clone(), scan.clone());
        scan
    }

    pub fn get(&self, scan_id: &str) -> Option<Arc<CompletedScan>> {
        self.inner.read().unwrap().get(scan_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
