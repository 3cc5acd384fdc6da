//! Scheduled polling of registered feeds.
//!
//! Each registered URI gets its own [`WakeableTimer`]. On a tick the feed is
//! fetched and parsed; failures are retried a fixed number of times with a
//! fixed delay, and the outcome (a fresh [`Feed`] or one carrying
//! [`Feed::error`]) is published to every subscriber.
//!
//! At most one fetch per URI is in flight at any time: a tick that finds the
//! previous fetch still running is skipped, and [`FeedMonitor::update`] waits
//! for it before fetching again.

mod frequency;
mod subscribers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

use crate::feed::{parse_feed, Feed, FetchError, Fetched, HttpFetcher, ParseOptions};
use crate::schedule::{network_aware, power_aware, Condition, ConditionGuard, WakeableTimer};

pub use frequency::Frequency;
pub use subscribers::{FeedHandler, SubscriptionId};

use frequency::adaptive_interval;
use subscribers::Subscribers;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Feed is not registered: {0}")]
    NotRegistered(Url),
}

/// Scheduling and retry settings.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Interval for [`Frequency::Auto`] before it adapts.
    pub check_interval: Duration,
    /// Interval for [`Frequency::High`]; the fastest `Auto` will go.
    pub high_interval: Duration,
    /// Interval for [`Frequency::Low`]; the slowest `Auto` will go.
    pub low_interval: Duration,
    /// Delay before the first check after [`FeedMonitor::start`].
    pub initial_delay: Duration,
    /// Extra attempts after a failed check.
    pub retry_count: u32,
    /// Fixed delay between attempts.
    pub retry_interval: Duration,
    pub parse: ParseOptions,
    /// Suspend polling while this is unmet, and re-check it before each tick.
    pub network: Option<Condition>,
    /// Suspend polling while the machine sleeps.
    pub power: Option<Condition>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60 * 60),
            high_interval: Duration::from_secs(15 * 60),
            low_interval: Duration::from_secs(6 * 60 * 60),
            initial_delay: Duration::ZERO,
            retry_count: 3,
            retry_interval: Duration::from_secs(30),
            parse: ParseOptions::default(),
            network: None,
            power: None,
        }
    }
}

impl MonitorOptions {
    /// Starting interval for `frequency`; `None` when it is never polled.
    /// A zero interval means manual refresh only.
    pub fn interval_for(&self, frequency: Frequency) -> Option<Duration> {
        let interval = match frequency {
            Frequency::None => return None,
            Frequency::High => self.high_interval,
            Frequency::Low => self.low_interval,
            Frequency::Auto => self.check_interval,
        };
        (!interval.is_zero()).then_some(interval)
    }
}

/// Polls registered feeds and publishes the results.
///
/// Cloning is cheap; clones share registrations and subscribers. Schedules
/// only run between [`start`](Self::start) and [`stop`](Self::stop), so
/// registrations can be prepared outside a runtime.
#[derive(Clone)]
pub struct FeedMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    fetcher: HttpFetcher,
    options: MonitorOptions,
    running: AtomicBool,
    registrations: Mutex<HashMap<Url, Registration>>,
    subscribers: Subscribers,
}

struct Registration {
    frequency: Frequency,
    /// Current polling interval; adapts over time for `Auto`.
    interval: Duration,
    schedule: Option<Schedule>,
    state: Arc<CheckState>,
}

/// A live timer plus the condition attachments that pause it.
struct Schedule {
    _guards: Vec<ConditionGuard>,
    timer: WakeableTimer,
}

/// Per-URI state shared with in-flight checks.
#[derive(Default)]
struct CheckState {
    /// Held for the duration of a check; this is the one-fetch-per-URI gate.
    validator: tokio::sync::Mutex<Option<String>>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FeedMonitor {
    pub fn new(fetcher: HttpFetcher, options: MonitorOptions) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                fetcher,
                options,
                running: AtomicBool::new(false),
                registrations: Mutex::new(HashMap::new()),
                subscribers: Subscribers::default(),
            }),
        }
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.inner.options
    }

    /// Registers `uri` with the default frequency. Returns `false` if it was
    /// already registered, in which case nothing changes.
    pub fn register(&self, uri: Url) -> bool {
        self.register_with(uri, Frequency::default())
    }

    pub fn register_with(&self, uri: Url, frequency: Frequency) -> bool {
        let mut registrations = lock(&self.inner.registrations);
        if registrations.contains_key(&uri) {
            return false;
        }

        let interval = self
            .inner
            .options
            .interval_for(frequency)
            .unwrap_or(Duration::ZERO);
        let mut registration = Registration {
            frequency,
            interval,
            schedule: None,
            state: Arc::default(),
        };
        if self.is_running() {
            registration.schedule = self.schedule_for(&uri, &registration);
        }

        tracing::debug!(feed = %uri, %frequency, "Registered feed");
        registrations.insert(uri, registration);
        true
    }

    /// Registers every URI, returning how many were new.
    pub fn register_all(&self, uris: impl IntoIterator<Item = Url>) -> usize {
        uris.into_iter().filter(|uri| self.register(uri.clone())).count()
    }

    /// Stops polling `uri`. A check already in flight still publishes.
    pub fn remove(&self, uri: &Url) -> bool {
        let removed = lock(&self.inner.registrations).remove(uri).is_some();
        if removed {
            tracing::debug!(feed = %uri, "Removed feed");
        }
        removed
    }

    pub fn clear(&self) {
        lock(&self.inner.registrations).clear();
    }

    pub fn is_registered(&self, uri: &Url) -> bool {
        lock(&self.inner.registrations).contains_key(uri)
    }

    pub fn registered(&self) -> Vec<Url> {
        lock(&self.inner.registrations).keys().cloned().collect()
    }

    pub fn frequency(&self, uri: &Url) -> Option<Frequency> {
        lock(&self.inner.registrations).get(uri).map(|r| r.frequency)
    }

    /// Current polling interval of `uri`; `None` if unregistered or never polled.
    pub fn interval(&self, uri: &Url) -> Option<Duration> {
        lock(&self.inner.registrations)
            .get(uri)
            .filter(|r| r.frequency != Frequency::None && !r.interval.is_zero())
            .map(|r| r.interval)
    }

    /// Time of the last completed check of `uri`, successful or not.
    pub fn last_checked(&self, uri: &Url) -> Option<DateTime<Utc>> {
        let registrations = lock(&self.inner.registrations);
        let registration = registrations.get(uri)?;
        let checked = *lock(&registration.state.last_checked);
        checked
    }

    /// Changes how often `uri` is polled, rescheduling it if running.
    pub fn set_frequency(&self, uri: &Url, frequency: Frequency) -> Result<(), MonitorError> {
        let mut registrations = lock(&self.inner.registrations);
        let registration = registrations
            .get_mut(uri)
            .ok_or_else(|| MonitorError::NotRegistered(uri.clone()))?;
        if registration.frequency == frequency {
            return Ok(());
        }

        registration.frequency = frequency;
        match self.inner.options.interval_for(frequency) {
            Some(interval) => {
                registration.interval = interval;
                match &registration.schedule {
                    Some(schedule) => schedule.timer.set_interval(interval),
                    None if self.is_running() => {
                        registration.schedule = self.schedule_for(uri, registration);
                    }
                    None => {}
                }
            }
            None => {
                registration.interval = Duration::ZERO;
                registration.schedule = None;
            }
        }
        tracing::debug!(feed = %uri, %frequency, "Frequency changed");
        Ok(())
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Feed) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.add(Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts a schedule for every polled registration.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut registrations = lock(&self.inner.registrations);
        let scheduled: Vec<(Url, Option<Schedule>)> = registrations
            .iter()
            .filter(|(_, r)| r.schedule.is_none())
            .map(|(uri, r)| (uri.clone(), self.schedule_for(uri, r)))
            .collect();
        for (uri, schedule) in scheduled {
            if let Some(registration) = registrations.get_mut(&uri) {
                registration.schedule = schedule;
            }
        }
        tracing::info!(feeds = registrations.len(), "Feed monitor started");
    }

    /// Cancels every pending tick. Checks already in flight complete and publish.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for registration in lock(&self.inner.registrations).values_mut() {
            registration.schedule = None;
        }
        tracing::info!("Feed monitor stopped");
    }

    /// Checks `uri` now, outside its schedule, and publishes the result.
    ///
    /// Waits for a check already in flight for `uri` to finish first. The
    /// regular schedule restarts from the end of this check.
    pub async fn update(&self, uri: &Url) -> Result<(), MonitorError> {
        let state = self
            .inner
            .state_of(uri)
            .ok_or_else(|| MonitorError::NotRegistered(uri.clone()))?;

        let mut validator = state.validator.lock().await;
        self.inner.check(uri, &state, &mut validator).await;
        drop(validator);

        if let Some(schedule) = lock(&self.inner.registrations)
            .get(uri)
            .and_then(|r| r.schedule.as_ref())
        {
            schedule.timer.reset();
        }
        Ok(())
    }

    fn schedule_for(&self, uri: &Url, registration: &Registration) -> Option<Schedule> {
        if registration.frequency == Frequency::None || registration.interval.is_zero() {
            return None;
        }

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let tick_uri = uri.clone();
        let timer = WakeableTimer::new(uri.as_str(), registration.interval, move || {
            let weak = weak.clone();
            let uri = tick_uri.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.scheduled_check(&uri).await;
                }
            }
        });

        let options = &self.inner.options;
        let mut guards = Vec::new();
        if let Some(network) = &options.network {
            guards.push(network_aware(&timer, network));
        }
        if let Some(power) = &options.power {
            guards.push(power_aware(&timer, power));
        }
        timer.start(Some(options.initial_delay));

        Some(Schedule {
            _guards: guards,
            timer,
        })
    }
}

impl MonitorInner {
    fn state_of(&self, uri: &Url) -> Option<Arc<CheckState>> {
        lock(&self.registrations)
            .get(uri)
            .map(|r| Arc::clone(&r.state))
    }

    async fn scheduled_check(&self, uri: &Url) {
        let Some(state) = self.state_of(uri) else {
            return;
        };
        let Ok(mut validator) = state.validator.try_lock() else {
            tracing::debug!(feed = %uri, "Previous check still running, skipping tick");
            return;
        };
        self.check(uri, &state, &mut validator).await;
    }

    /// Runs one check with retries and publishes the outcome.
    async fn check(&self, uri: &Url, state: &CheckState, etag: &mut Option<String>) {
        let attempts = self.options.retry_count.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.fetch_once(uri, etag.as_deref()).await {
                Ok(Fetched::Modified {
                    value: mut feed,
                    etag: new_etag,
                }) => {
                    let now = Utc::now();
                    feed.last_checked = Some(now);
                    *lock(&state.last_checked) = Some(now);
                    *etag = new_etag;
                    self.adapt_interval(uri, &feed);

                    tracing::info!(feed = %uri, items = feed.items.len(), attempt, "Feed updated");
                    self.subscribers.publish(&feed);
                    return;
                }
                Ok(Fetched::NotModified) => {
                    *lock(&state.last_checked) = Some(Utc::now());
                    tracing::debug!(feed = %uri, "Feed not modified");
                    return;
                }
                Err(e) => {
                    tracing::warn!(feed = %uri, attempt, attempts, error = %e, "Feed check failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_interval).await;
                    }
                }
            }
        }

        let now = Utc::now();
        *lock(&state.last_checked) = Some(now);
        let error = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(feed = %uri, attempts, error = %error, "Giving up on feed check");
        self.subscribers.publish(&Feed::failed(uri.clone(), error, now));
    }

    async fn fetch_once(&self, uri: &Url, etag: Option<&str>) -> Result<Fetched<Feed>, FetchError> {
        let parse = self.options.parse;
        // `Feed` has no `Default`, so convert through `Option<Feed>`; with
        // `ignore_errors` off the converter's result is never replaced.
        let fetched = self
            .fetcher
            .fetch_as(uri, etag, |body| Ok(Some(parse_feed(body, uri, &parse)?)), false)
            .await
            .map_err(|e| match e {
                // Keep the parser's own message for the error feed
                FetchError::Convert(message) => FetchError::Parse(message),
                other => other,
            })?;
        match fetched {
            Fetched::Modified { value: Some(feed), etag } => Ok(Fetched::Modified { value: feed, etag }),
            Fetched::Modified { value: None, .. } => {
                Err(FetchError::Parse("feed conversion produced no value".to_string()))
            }
            Fetched::NotModified => Ok(Fetched::NotModified),
        }
    }

    fn adapt_interval(&self, uri: &Url, feed: &Feed) {
        let mut registrations = lock(&self.registrations);
        let Some(registration) = registrations.get_mut(uri) else {
            return;
        };
        let options = &self.options;
        if registration.frequency != Frequency::Auto || options.check_interval.is_zero() {
            return;
        }

        let interval = adaptive_interval(
            feed,
            options.check_interval,
            options.high_interval,
            options.low_interval,
        );
        if !interval.is_zero() && interval != registration.interval {
            tracing::debug!(feed = %uri, interval_secs = interval.as_secs(), "Adapted check interval");
            registration.interval = interval;
            if let Some(schedule) = &registration.schedule {
                schedule.timer.set_interval(interval);
            }
        }
    }
}
