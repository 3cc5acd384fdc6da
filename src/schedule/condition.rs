use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// A process-wide boolean signal that timers can follow.
///
/// The platform layer owns the truth (is the network reachable, is the
/// machine awake) and publishes it with [`Condition::set`]. Timers attach via
/// the decorators in [`crate::schedule`] and are suspended while the
/// condition is unmet.
///
/// Clones share the same signal.
#[derive(Clone)]
pub struct Condition {
    name: &'static str,
    tx: Arc<watch::Sender<bool>>,
}

impl Condition {
    pub fn new(name: &'static str, initially_met: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_met);
        Self {
            name,
            tx: Arc::new(tx),
        }
    }

    /// Network reachability, initially available.
    pub fn network() -> Self {
        Self::new("network", true)
    }

    /// Machine power state, initially awake.
    pub fn power() -> Self {
        Self::new("power", true)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_met(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publishes a new state. Listeners are only woken on actual transitions.
    pub fn set(&self, met: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == met {
                false
            } else {
                *current = met;
                true
            }
        });
        if changed {
            tracing::debug!(condition = self.name, met, "Condition changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// True when both handles publish the same signal.
    pub fn same_signal(&self, other: &Condition) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("met", &self.is_met())
            .finish()
    }
}
