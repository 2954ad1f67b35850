use std::collections::HashSet;

use url::Url;

/// Remembers which detail URLs this run has already handled.
///
/// Can be seeded with URLs stored by earlier runs so they are skipped too.
#[derive(Debug, Default)]
pub struct DedupGate {
    seen: HashSet<String>,
    preloaded: usize,
}

/// The uniqueness key of a job: its detail URL without fragment.
pub fn dedup_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preload(&mut self, keys: impl IntoIterator<Item = String>) {
        let before = self.seen.len();
        self.seen.extend(keys);
        self.preloaded += self.seen.len() - before;
    }

    pub fn seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn mark(&mut self, key: impl Into<String>) {
        self.seen.insert(key.into());
    }

    /// Check and mark in one step. Returns `true` only the first time a key is offered.
    pub fn admit(&mut self, key: &str) -> bool {
        if self.seen(key) {
            return false;
        }
        self.mark(key);
        true
    }

    pub fn preloaded(&self) -> usize {
        self.preloaded
    }
}
