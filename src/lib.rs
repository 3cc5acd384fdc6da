//! Feed acquisition and caching for an RSS/Atom reader.
//!
//! - [`feed`]: the feed model, RSS/Atom parsing and HTTP retrieval
//! - [`schedule`]: wakeable interval timers that pause while the network is
//!   down or the machine sleeps
//! - [`monitor`]: per-feed polling with retries and result subscriptions
//! - [`storage`]: a disk-backed feed cache with a bounded working set
//! - [`config`]: TOML configuration

pub mod config;
pub mod feed;
pub mod monitor;
pub mod schedule;
pub mod storage;
pub mod util;
