use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lru::LruCache;
use url::Url;

use super::snapshot::{self, cache_path};
use super::CacheError;
use crate::feed::Feed;

/// Disk-backed map from feed URI to [`Feed`] with a bounded working set.
///
/// Every feed stays in the map for its whole life, but only up to
/// `capacity` of them keep their items in memory ("resident"). When the
/// working set grows past that, the least recently touched unlocked feed is
/// written to its cache file and its items are dropped. Touching it again
/// reloads the unread items from disk.
///
/// Locked entries are never evicted until [`unlock`](Self::unlock)ed.
///
/// Dropping the cache writes every resident feed to disk unless it was
/// opened read-only.
pub struct FeedCache {
    directory: PathBuf,
    capacity: usize,
    read_only: bool,
    feeds: HashMap<Url, Feed>,
    /// Resident entries, most recently touched first. The value is the lock flag.
    residency: LruCache<Url, bool>,
}

impl FeedCache {
    /// Opens a cache rooted at `directory`, creating it if needed.
    pub fn open(directory: impl Into<PathBuf>, capacity: usize) -> Result<Self, CacheError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|source| CacheError::Io {
            path: directory.clone(),
            source,
        })?;

        Ok(Self {
            directory,
            capacity,
            read_only: false,
            feeds: HashMap::new(),
            residency: LruCache::unbounded(),
        })
    }

    /// A read-only cache still evicts to disk but does not flush on drop.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cache file backing `uri`.
    pub fn cache_path(&self, uri: &Url) -> PathBuf {
        cache_path(&self.directory, uri)
    }

    /// Returns the feed for `uri`, loading its unread items from disk if
    /// they are not in memory.
    ///
    /// `locked = true` pins the entry until [`unlock`](Self::unlock); passing
    /// `false` never clears an existing lock.
    pub fn get(&mut self, uri: &Url, locked: bool) -> Option<&Feed> {
        if self.touch(uri, locked) {
            self.feeds.get(uri)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, uri: &Url, locked: bool) -> Option<&mut Feed> {
        if self.touch(uri, locked) {
            self.feeds.get_mut(uri)
        } else {
            None
        }
    }

    /// Inserts or replaces the feed stored under its URI.
    ///
    /// A feed without items whose cache file exists stays non-resident, so
    /// the next [`get`](Self::get) restores its items from disk.
    pub fn insert(&mut self, feed: Feed) -> Option<Feed> {
        let uri = feed.uri().clone();
        let resident = self.residency.contains(&uri)
            || !feed.items.is_empty()
            || !self.cache_path(&uri).exists();

        let previous = self.feeds.insert(uri.clone(), feed);
        if resident {
            let locked = self.residency.pop(&uri).unwrap_or(false);
            self.residency.put(uri.clone(), locked);
        }
        self.stash(Some(&uri));
        previous
    }

    pub fn unlock(&mut self, uri: &Url) {
        if let Some(locked) = self.residency.peek_mut(uri) {
            *locked = false;
        }
        self.stash(None);
    }

    pub fn is_locked(&self, uri: &Url) -> bool {
        self.residency.peek(uri).copied().unwrap_or(false)
    }

    /// Removes `uri` from the cache, deleting its file when `delete_cache` is set.
    pub fn remove(&mut self, uri: &Url, delete_cache: bool) -> Result<Option<Feed>, CacheError> {
        self.residency.pop(uri);
        let removed = self.feeds.remove(uri);

        if delete_cache {
            let path = self.cache_path(uri);
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(feed = %uri, "Deleted cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(CacheError::Io { path, source }),
            }
        }
        Ok(removed)
    }

    pub fn contains_key(&self, uri: &Url) -> bool {
        self.feeds.contains_key(uri)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Url> {
        self.feeds.keys()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Number of feeds currently holding their items in memory.
    pub fn resident_count(&self) -> usize {
        self.residency.len()
    }

    pub fn is_resident(&self, uri: &Url) -> bool {
        self.residency.contains(uri)
    }

    /// Writes every resident feed to disk. Returns how many were written.
    ///
    /// Every feed is attempted; the first failure is returned afterwards.
    pub fn flush(&mut self) -> Result<usize, CacheError> {
        let mut written = 0;
        let mut first_error = None;

        for (uri, _) in self.residency.iter() {
            let Some(feed) = self.feeds.get(uri) else {
                continue;
            };
            match snapshot::save(&self.directory, feed) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(feed = %uri, error = %e, "Failed to write cache file");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Bulk export would have to load every feed from disk at once.
    pub fn copy_to(&self, _target: &mut Vec<Feed>) -> Result<(), CacheError> {
        Err(CacheError::Unsupported("copy_to"))
    }

    /// Marks `uri` resident, loading it from disk if needed. Returns whether
    /// the cache knows `uri`.
    fn touch(&mut self, uri: &Url, locked: bool) -> bool {
        if !self.feeds.contains_key(uri) {
            let Some(stored) = snapshot::load(&self.directory, uri) else {
                return false;
            };
            tracing::debug!(feed = %uri, items = stored.items.len(), "Loaded feed from cache");
            self.feeds.insert(uri.clone(), stored.into_feed());
            self.residency.put(uri.clone(), locked);
        } else if let Some(flag) = self.residency.get_mut(uri) {
            *flag |= locked;
        } else {
            if let (Some(stored), Some(feed)) =
                (snapshot::load(&self.directory, uri), self.feeds.get_mut(uri))
            {
                tracing::debug!(feed = %uri, items = stored.items.len(), "Restored feed items from cache");
                stored.merge_into(feed);
            }
            self.residency.put(uri.clone(), locked);
        }

        self.stash(Some(uri));
        true
    }

    /// Evicts the least recently touched unlocked entries until the working
    /// set fits. `keep` is never evicted.
    fn stash(&mut self, keep: Option<&Url>) {
        while self.residency.len() > self.capacity {
            let victim = self
                .residency
                .iter()
                .rev()
                .find(|(uri, locked)| !**locked && Some(*uri) != keep)
                .map(|(uri, _)| uri.clone());
            let Some(victim) = victim else {
                break;
            };
            self.residency.pop(&victim);

            let Some(feed) = self.feeds.get_mut(&victim) else {
                continue;
            };
            match snapshot::save(&self.directory, feed) {
                Ok(()) => {
                    tracing::debug!(feed = %victim, items = feed.items.len(), "Evicted feed to disk");
                    feed.items = Vec::new();
                }
                Err(e) => {
                    // Items stay in memory rather than being lost
                    tracing::warn!(feed = %victim, error = %e, "Failed to evict feed to disk");
                }
            }
        }
    }
}

impl Drop for FeedCache {
    fn drop(&mut self) {
        if self.read_only {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Feed cache flush on shutdown failed");
        }
    }
}
