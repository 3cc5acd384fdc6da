use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use feedwatch::config::Config;
use feedwatch::feed::{registry, Feed, HttpFetcher};
use feedwatch::monitor::{FeedMonitor, MonitorOptions};
use feedwatch::schedule::Condition;
use feedwatch::storage::FeedCache;

/// Get the config directory path (~/.config/feedwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedwatch"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedwatch",
    version,
    about = "Polls RSS/Atom feeds and keeps unread items in a disk-backed cache"
)]
struct Args {
    /// Config file (default: ~/.config/feedwatch/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subscription registry, overriding `feeds_file` from the config
    #[arg(long, value_name = "FILE")]
    feeds: Option<PathBuf>,

    /// Check every feed once, print a summary and exit
    #[arg(long)]
    once: bool,
}

/// Stores a published feed. A failed check keeps the cached items and only
/// records the error; a successful one keeps the read state of known items.
fn store(cache: &Mutex<FeedCache>, feed: &Feed) {
    let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
    let mut fresh = feed.clone();
    if let Some(existing) = cache.get_mut(feed.uri(), false) {
        if feed.is_failed() {
            existing.error = feed.error.clone();
            existing.last_checked = feed.last_checked;
            return;
        }
        fresh.carry_over_statuses(existing);
    }
    cache.insert(fresh);
}

fn print_summary(cache: &Mutex<FeedCache>) {
    let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
    let mut uris: Vec<_> = cache.keys().cloned().collect();
    uris.sort();
    for uri in uris {
        if let Some(feed) = cache.get(&uri, false) {
            match &feed.error {
                Some(error) => println!("{}: error: {}", feed.title, error),
                None => println!("{}: {} unread", feed.title, feed.unread_count()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let feeds_path = args
        .feeds
        .clone()
        .unwrap_or_else(|| config.feeds_file(&config_dir));
    let subscriptions = registry::load(&feeds_path).await?;
    if subscriptions.is_empty() {
        eprintln!("No feeds to watch.");
        eprintln!("Add subscriptions to {}", feeds_path.display());
        return Ok(());
    }

    let cache_dir = config.cache_dir(&config_dir);
    let cache = FeedCache::open(&cache_dir, config.cache_capacity)
        .with_context(|| format!("Failed to open feed cache: {}", cache_dir.display()))?
        .read_only(config.read_only_cache);
    let cache = Arc::new(Mutex::new(cache));

    {
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        for sub in &subscriptions {
            let mut placeholder = Feed::placeholder(sub.uri.clone());
            placeholder.title = sub.title.clone();
            if !cache.contains_key(&sub.uri) {
                cache.insert(placeholder);
            }
        }
    }

    // Platform integrations publish reachability and sleep/wake into these
    let network = Condition::network();
    let power = Condition::power();

    let fetcher = HttpFetcher::new(config.fetch_options()).context("Failed to build HTTP client")?;
    let monitor = FeedMonitor::new(
        fetcher,
        MonitorOptions {
            network: Some(network),
            power: Some(power),
            ..config.monitor_options()
        },
    );

    let sink = Arc::clone(&cache);
    monitor.subscribe(move |feed| {
        store(&sink, feed);
        Ok(())
    });
    let registered = monitor.register_all(subscriptions.iter().map(|s| s.uri.clone()));
    tracing::info!(feeds = registered, "Registered feeds");

    if args.once {
        let uris = monitor.registered();
        futures::future::join_all(uris.iter().map(|uri| monitor.update(uri))).await;
        print_summary(&cache);
    } else {
        monitor.start();
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        monitor.stop();
    }

    monitor.clear();
    drop(monitor);

    match Arc::try_unwrap(cache) {
        Ok(cache) => {
            let cache = cache.into_inner().unwrap_or_else(PoisonError::into_inner);
            tracing::info!(feeds = cache.len(), resident = cache.resident_count(), "Flushing feed cache");
            drop(cache);
        }
        Err(_) => {
            tracing::info!("Feed cache still in use by a running check; it flushes when that check ends");
        }
    }
    Ok(())
}
