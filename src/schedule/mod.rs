//! Wakeable timers and the conditions that pause them.
//!
//! A [`WakeableTimer`] ticks on a fixed interval and can be suspended and
//! resumed without losing its place. [`network_aware`] and [`power_aware`]
//! tie a timer to a [`Condition`] so that it sleeps while the network is down
//! or the machine is suspended, and picks up where it left off afterwards.

mod aware;
mod condition;
mod timer;

pub use aware::{network_aware, power_aware, ConditionGuard};
pub use condition::Condition;
pub use timer::{TimerHandle, TimerState, WakeableTimer, MIN_INTERVAL};
