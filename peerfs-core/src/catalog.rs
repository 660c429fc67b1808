//! Local catalog: files this node serves. Built once at startup, read-only afterwards.

use std::collections::HashMap;

use crate::index::FileMeta;

pub struct Catalog {
    files: Vec<FileMeta>,
    /// Fingerprint -> position in `files`. First indexed entry wins on duplicate content.
    by_fingerprint: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(files: Vec<FileMeta>) -> Self {
        let mut by_fingerprint = HashMap::with_capacity(files.len());
        for (i, f) in files.iter().enumerate() {
            by_fingerprint.entry(f.file_fingerprint.clone()).or_insert(i);
        }
        Self {
            files,
            by_fingerprint,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Case-insensitive substring match on file name. Order is unspecified.
    pub fn search(&self, query: &str) -> Vec<FileMeta> {
        let needle = query.to_lowercase();
        self.files
            .iter()
            .filter(|f| f.name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Exact match on whole-file fingerprint.
    pub fn lookup(&self, file_fingerprint: &str) -> Option<&FileMeta> {
        self.by_fingerprint
            .get(file_fingerprint)
            .map(|&i| &self.files[i])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
