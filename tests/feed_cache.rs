//! Integration tests for the disk-backed feed cache.
//!
//! Each test works in its own temporary directory, removed on drop.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use feedwatch::feed::{Feed, FeedItem, ItemStatus};
use feedwatch::storage::FeedCache;
use pretty_assertions::assert_eq;
use url::Url;

struct TempDir(PathBuf);

impl TempDir {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "feedwatch_it_cache_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        Self(path)
    }

    fn file_count(&self) -> usize {
        count_files(&self.0)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

fn uri(n: usize) -> Url {
    Url::parse(&format!("https://feeds{n}.example/rss")).unwrap()
}

fn feed(n: usize) -> Feed {
    let mut feed = Feed::placeholder(uri(n));
    feed.title = format!("Feed {n}");
    feed.items = vec![
        FeedItem {
            title: "fresh".to_string(),
            status: ItemStatus::Unread,
            ..FeedItem::default()
        },
        FeedItem {
            title: "seen".to_string(),
            status: ItemStatus::Read,
            ..FeedItem::default()
        },
    ];
    feed
}

fn full_feed(n: usize) -> Feed {
    let mut feed = Feed::new(uri(n));
    feed.title = format!("Feed {n} & friends");
    feed.description = "Everything about <things>".to_string();
    feed.link = Some(format!("https://feeds{n}.example/"));
    feed.last_checked = Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap());
    feed.last_published = Some(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap());
    feed.items = vec![FeedItem {
        title: "Leap day".to_string(),
        summary: "Once every four years".to_string(),
        content: "<p>Once every <em>four</em> years</p>".to_string(),
        link: Some(format!("https://feeds{n}.example/leap")),
        publish_time: feed.last_published,
        status: ItemStatus::Unread,
    }];
    feed
}

fn assert_same_metadata(restored: &Feed, expected: &Feed) {
    assert_eq!(restored.title, expected.title);
    assert_eq!(restored.description, expected.description);
    assert_eq!(restored.uri(), expected.uri());
    assert_eq!(restored.link, expected.link);
    assert_eq!(restored.last_checked, expected.last_checked);
    assert_eq!(restored.last_published, expected.last_published);
    assert_eq!(restored.items, expected.items);
}

// ============================================================================
// Capacity and flush
// ============================================================================

#[test]
fn test_capacity_bounds_memory_and_flush_persists_rest() {
    let dir = TempDir::new("capacity");
    {
        let mut cache = FeedCache::open(&dir.0, 3).unwrap();
        for n in 0..6 {
            cache.insert(feed(n));
        }

        assert_eq!(cache.len(), 6);
        assert_eq!(cache.resident_count(), 3);
        // The three evicted feeds were written out
        assert_eq!(dir.file_count(), 3);
        for n in 0..3 {
            assert!(!cache.is_resident(&uri(n)));
        }
    }

    // Dropping flushed the resident three as well
    assert_eq!(dir.file_count(), 6);
}

#[test]
fn test_reopened_cache_restores_unread_items_only() {
    let dir = TempDir::new("reopen");
    {
        let mut cache = FeedCache::open(&dir.0, 8).unwrap();
        cache.insert(feed(1));
    }

    let mut cache = FeedCache::open(&dir.0, 8).unwrap();
    let restored = cache.get(&uri(1), false).unwrap();
    assert_eq!(restored.title, "Feed 1");
    let titles: Vec<_> = restored.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["fresh"]);
}

#[test]
fn test_locked_feed_survives_pressure() {
    let dir = TempDir::new("locked");
    let mut cache = FeedCache::open(&dir.0, 2).unwrap();

    cache.insert(feed(0));
    assert!(cache.get(&uri(0), true).is_some());
    for n in 1..10 {
        cache.insert(feed(n));
    }

    assert!(cache.is_resident(&uri(0)));
    assert_eq!(cache.get(&uri(0), false).unwrap().items.len(), 2);

    cache.unlock(&uri(0));
    cache.insert(feed(10));
    cache.insert(feed(11));
    assert!(!cache.is_resident(&uri(0)));
}

#[test]
fn test_read_only_cache_leaves_disk_untouched_on_drop() {
    let dir = TempDir::new("readonly");
    {
        let mut cache = FeedCache::open(&dir.0, 8).unwrap().read_only(true);
        assert!(cache.is_read_only());
        cache.insert(feed(1));
        cache.insert(feed(2));
    }
    assert_eq!(dir.file_count(), 0);
}

#[test]
fn test_mutations_through_get_mut_are_persisted() {
    let dir = TempDir::new("mutate");
    {
        let mut cache = FeedCache::open(&dir.0, 8).unwrap();
        cache.insert(feed(1));
        let live = cache.get_mut(&uri(1), false).unwrap();
        live.items[0].status = ItemStatus::Read;
        live.items.push(FeedItem {
            title: "later".to_string(),
            status: ItemStatus::Uninitialized,
            ..FeedItem::default()
        });
    }

    let mut cache = FeedCache::open(&dir.0, 8).unwrap();
    let titles: Vec<_> = cache
        .get(&uri(1), false)
        .unwrap()
        .items
        .iter()
        .map(|i| i.title.clone())
        .collect();
    assert_eq!(titles, ["later"]);
}

#[test]
fn test_metadata_survives_flush_and_reopen() {
    let dir = TempDir::new("roundtrip_flush");
    let expected = full_feed(1);
    {
        let mut cache = FeedCache::open(&dir.0, 8).unwrap();
        cache.insert(expected.clone());
    }

    let mut cache = FeedCache::open(&dir.0, 8).unwrap();
    let restored = cache.get(&uri(1), false).unwrap();
    assert_same_metadata(restored, &expected);
}

#[test]
fn test_metadata_survives_eviction() {
    let dir = TempDir::new("roundtrip_evict");
    let expected = full_feed(1);

    let mut writer = FeedCache::open(&dir.0, 1).unwrap();
    writer.insert(expected.clone());
    writer.insert(full_feed(2));
    assert!(!writer.is_resident(&uri(1)));

    // A second cache over the same directory sees only what eviction wrote
    let mut reader = FeedCache::open(&dir.0, 8).unwrap().read_only(true);
    let restored = reader.get(&uri(1), false).unwrap();
    assert_same_metadata(restored, &expected);
}
