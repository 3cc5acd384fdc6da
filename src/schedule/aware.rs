use tokio::task::JoinHandle;

use super::condition::Condition;
use super::timer::{TimerHandle, WakeableTimer};

/// Keeps a timer attached to a [`Condition`]. Dropping the guard detaches it.
#[must_use = "the timer detaches from the condition when the guard is dropped"]
pub struct ConditionGuard {
    condition: Condition,
    timer: TimerHandle,
    watcher: JoinHandle<()>,
}

impl Drop for ConditionGuard {
    fn drop(&mut self) {
        self.watcher.abort();
        self.timer.detach_condition(&self.condition);
    }
}

/// Suspends `timer` while the network is unreachable.
///
/// Besides following transitions, the timer checks reachability right
/// before each tick and suspends instead of firing when it is down.
pub fn network_aware(timer: &WakeableTimer, network: &Condition) -> ConditionGuard {
    attach(timer, network, true)
}

/// Suspends `timer` while the machine sleeps and resumes it on wake with the
/// remaining time of the interval.
pub fn power_aware(timer: &WakeableTimer, power: &Condition) -> ConditionGuard {
    attach(timer, power, false)
}

fn attach(timer: &WakeableTimer, condition: &Condition, check_before_tick: bool) -> ConditionGuard {
    timer.attach_condition(condition.clone(), check_before_tick);

    let handle = timer.handle();
    let watched = condition.clone();
    let mut rx = condition.subscribe();
    let watcher = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let met = *rx.borrow_and_update();
            if !handle.on_condition_changed(&watched, met) {
                break;
            }
        }
    });

    ConditionGuard {
        condition: condition.clone(),
        timer: timer.handle(),
        watcher,
    }
}
