use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::feed::Feed;
use crate::util::panic_message;

/// Callback receiving every published feed, successful or failed.
pub type FeedHandler = Arc<dyn Fn(&Feed) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a handler for [`FeedMonitor::unsubscribe`](super::FeedMonitor::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(super) struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, FeedHandler)>>,
}

impl Subscribers {
    pub fn add(&self, handler: FeedHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, handler));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `feed` to every handler. A failing or panicking handler is
    /// logged and does not affect the others.
    pub fn publish(&self, feed: &Feed) {
        // Snapshot so handlers may (un)subscribe while being called
        let handlers: Vec<_> = self.lock().clone();

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(feed))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(feed = %feed.uri(), subscriber = id.0, error = %e, "Feed subscriber failed");
                }
                Err(panic) => {
                    tracing::error!(
                        feed = %feed.uri(),
                        subscriber = id.0,
                        error = %panic_message(panic.as_ref()),
                        "Feed subscriber panicked"
                    );
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, FeedHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
