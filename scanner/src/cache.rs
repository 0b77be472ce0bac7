use std::{fmt, sync::Arc};

use dashmap::DashMap;
use keel_graph::ClassIndex;
use sha2::Digest as _;
use url::Url;

/// Content key of a classpath: SHA-256 over the sorted, de-duplicated entry URLs.
///
/// Entry order does not matter, so two modules listing the same jars share one scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScanKey([u8; 32]);

impl ScanKey {
    pub fn for_classpath(classpath: &[Url]) -> Self {
        let mut entries: Vec<&str> = classpath.iter().map(Url::as_str).collect();
        entries.sort_unstable();
        entries.dedup();

        let mut hasher = sha2::Sha256::new();
        for entry in entries {
            hasher.update(entry.as_bytes());
            hasher.update([0]);
        }
        Self(hasher.finalize().into())
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sha256:")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CacheEntry {
    index: Arc<ClassIndex>,
    refs: usize,
}

/// Scan results shared across deployments.
///
/// Every deployment that uses an entry holds one reference to it; the entry is evicted
/// when the last reference is released or when it is invalidated explicitly.
#[derive(Clone, Debug, Default)]
pub struct ScanCache {
    inner: Arc<DashMap<ScanKey, CacheEntry>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry without taking a reference.
    pub fn get(&self, key: &ScanKey) -> Option<Arc<ClassIndex>> {
        self.inner.get(key).map(|entry| Arc::clone(&entry.index))
    }

    /// Look up an entry and take a reference on it.
    pub fn acquire(&self, key: &ScanKey) -> Option<Arc<ClassIndex>> {
        let mut entry = self.inner.get_mut(key)?;
        entry.refs += 1;
        Some(Arc::clone(&entry.index))
    }

    /// Store a freshly scanned index and take a reference on it.
    ///
    /// If another deployment stored the same key first, its index wins and is returned.
    pub fn insert(&self, key: ScanKey, index: ClassIndex) -> Arc<ClassIndex> {
        let mut entry = self.inner.entry(key).or_insert_with(|| CacheEntry {
            index: Arc::new(index),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.index)
    }

    /// Drop one reference; returns true if this evicted the entry.
    pub fn release(&self, key: &ScanKey) -> bool {
        let evict = match self.inner.get_mut(key) {
            Some(mut entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => return false,
        };
        // The guard above must be gone before removing from the same shard.
        evict && self.inner.remove_if(key, |_, entry| entry.refs == 0).is_some()
    }

    /// Evict an entry regardless of its references, e.g. before a redeploy of changed code.
    pub fn invalidate(&self, key: &ScanKey) -> bool {
        let removed = self.inner.remove(key).is_some();
        if removed {
            tracing::debug!(%key, "invalidated scan cache entry");
        }
        removed
    }

    pub fn invalidate_classpath(&self, classpath: &[Url]) -> bool {
        self.invalidate(&ScanKey::for_classpath(classpath))
    }

    pub fn refs(&self, key: &ScanKey) -> usize {
        self.inner.get(key).map_or(0, |entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// The cache references held by one deployment; released on drop.
#[derive(Debug)]
pub struct ScanLease {
    cache: ScanCache,
    keys: Vec<ScanKey>,
}

impl ScanLease {
    pub(crate) fn new(cache: ScanCache) -> Self {
        Self {
            cache,
            keys: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, key: ScanKey) {
        self.keys.push(key);
    }

    pub fn keys(&self) -> &[ScanKey] {
        &self.keys
    }
}

impl Drop for ScanLease {
    fn drop(&mut self) {
        for key in &self.keys {
            self.cache.release(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use keel_graph::ClassDescriptor;

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn index(name: &str) -> ClassIndex {
        ClassIndex::from_classes(vec![ClassDescriptor::new(name)])
    }

    #[test]
    fn key_ignores_entry_order_and_duplicates() {
        let a = ScanKey::for_classpath(&[url("file:///a.jar"), url("file:///b.jar")]);
        let b = ScanKey::for_classpath(&[
            url("file:///b.jar"),
            url("file:///a.jar"),
            url("file:///b.jar"),
        ]);
        let c = ScanKey::for_classpath(&[url("file:///a.jar")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string().starts_with("sha256:"));
    }

    #[test]
    fn entries_are_evicted_with_their_last_reference() {
        let cache = ScanCache::new();
        let key = ScanKey::for_classpath(&[url("file:///a.jar")]);

        let first = cache.insert(key, index("a.First"));
        let shared = cache.acquire(&key).expect("entry present");
        assert!(Arc::ptr_eq(&first, &shared));
        assert_eq!(cache.refs(&key), 2);

        assert!(!cache.release(&key));
        assert!(cache.get(&key).is_some());
        assert!(cache.release(&key));
        assert!(cache.is_empty());
        assert!(!cache.release(&key));
    }

    #[test]
    fn first_insert_wins() {
        let cache = ScanCache::new();
        let key = ScanKey::for_classpath(&[url("file:///a.jar")]);
        cache.insert(key, index("a.First"));
        let second = cache.insert(key, index("a.Second"));
        assert!(second.get("a.First").is_some());
        assert_eq!(cache.refs(&key), 2);
    }

    #[test]
    fn invalidate_ignores_references() {
        let cache = ScanCache::new();
        let classpath = [url("file:///a.jar")];
        let key = ScanKey::for_classpath(&classpath);
        cache.insert(key, index("a.First"));

        assert!(cache.invalidate_classpath(&classpath));
        assert!(cache.acquire(&key).is_none());
        assert!(!cache.invalidate(&key));
    }

    #[test]
    fn lease_releases_on_drop() {
        let cache = ScanCache::new();
        let key = ScanKey::for_classpath(&[url("file:///a.jar")]);
        cache.insert(key, index("a.First"));
        cache.acquire(&key);

        let mut lease = ScanLease::new(cache.clone());
        lease.push(key);
        drop(lease);
        assert_eq!(cache.refs(&key), 1);
    }
}
