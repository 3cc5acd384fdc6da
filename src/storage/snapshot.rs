//! On-disk format of a cached feed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::CacheError;
use crate::feed::{Feed, FeedItem};

/// JSON body of one cache file. Only unread items are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Snapshot {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub uri: Url,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

impl Snapshot {
    pub fn of(feed: &Feed) -> Self {
        Self {
            title: feed.title.clone(),
            description: feed.description.clone(),
            uri: feed.uri().clone(),
            link: feed.link.clone(),
            last_checked: feed.last_checked,
            last_published: feed.last_published,
            items: feed
                .items
                .iter()
                .filter(|item| item.status.is_unread())
                .cloned()
                .collect(),
        }
    }

    pub fn into_feed(self) -> Feed {
        let mut feed = Feed::new(self.uri.clone());
        self.merge_into(&mut feed);
        feed
    }

    /// Restores items into a feed that has none, and fills metadata the
    /// live feed lacks. Never overwrites fresher live data.
    pub fn merge_into(self, feed: &mut Feed) {
        if feed.items.is_empty() {
            feed.items = self.items;
        }
        let placeholder_title = feed.title.is_empty() || feed.title == feed.uri().as_str();
        if placeholder_title && !self.title.is_empty() {
            feed.title = self.title;
        }
        if feed.description.is_empty() {
            feed.description = self.description;
        }
        if feed.link.is_none() {
            feed.link = self.link;
        }
        feed.last_checked = feed.last_checked.max(self.last_checked);
        feed.last_published = feed.last_published.max(self.last_published);
    }
}

/// Cache file for `uri`: hex SHA-256 of the URI string, so any URI maps to a
/// filesystem-safe name.
pub(super) fn cache_path(directory: &Path, uri: &Url) -> PathBuf {
    directory.join(format!("{:x}", Sha256::digest(uri.as_str().as_bytes())))
}

/// Loads the snapshot for `uri`. Missing, unreadable or corrupt files are a
/// cache miss.
pub(super) fn load(directory: &Path, uri: &Url) -> Option<Snapshot> {
    let path = cache_path(directory, uri);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(feed = %uri, path = %path.display(), error = %e, "Cache miss");
            return None;
        }
    };

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) if &snapshot.uri == uri => Some(snapshot),
        Ok(snapshot) => {
            tracing::debug!(feed = %uri, found = %snapshot.uri, "Cache file belongs to another feed");
            None
        }
        Err(e) => {
            tracing::debug!(feed = %uri, path = %path.display(), error = %e, "Ignoring corrupt cache file");
            None
        }
    }
}

/// Writes the snapshot of `feed` atomically: temp file, fsync, rename.
pub(super) fn save(directory: &Path, feed: &Feed) -> Result<(), CacheError> {
    let path = cache_path(directory, feed.uri());
    let body = serde_json::to_vec(&Snapshot::of(feed))?;

    // Unpredictable temp name; create_new refuses to follow a planted file
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{suffix:016x}"));
    let io_err = |source: std::io::Error| CacheError::Io {
        path: temp_path.clone(),
        source,
    };

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(io_err)?;
    let written = temp_file
        .write_all(&body)
        .and_then(|()| temp_file.sync_all());
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(e));
    }
    drop(temp_file);

    if let Err(source) = std::fs::rename(&temp_path, &path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(CacheError::Io { path, source });
    }
    Ok(())
}
