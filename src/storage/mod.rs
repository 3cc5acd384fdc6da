//! Disk-backed feed cache.
//!
//! [`FeedCache`] keeps a bounded number of feeds' items in memory and spills
//! the rest to one JSON file per feed under the cache directory.

mod feed_cache;
mod snapshot;

use std::path::PathBuf;

use thiserror::Error;

pub use feed_cache::FeedCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Operation not supported by the feed cache: {0}")]
    Unsupported(&'static str),
}
