use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::condition::Condition;

type TickFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Shortest interval a timer accepts; anything below is raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Wall-clock drift below this on resume is clock jitter, not machine sleep.
const SLEEP_THRESHOLD: Duration = Duration::from_secs(1);

/// Lifecycle of a [`WakeableTimer`].
///
/// `Stopped -> Running <-> Suspended -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuspendCause {
    /// [`WakeableTimer::suspend`] was called directly.
    Manual,
    /// An attached condition went unmet.
    Condition,
}

struct Schedule {
    state: TimerState,
    interval: Duration,
    last_executed: Instant,
    next_due: Instant,
    /// Monotonic and wall-clock time of the last suspension, plus its cause.
    suspended: Option<(Instant, SystemTime, SuspendCause)>,
    driver: Option<JoinHandle<()>>,
}

struct Attached {
    condition: Condition,
    check_before_tick: bool,
}

struct TimerShared {
    name: String,
    schedule: Mutex<Schedule>,
    conditions: Mutex<Vec<Attached>>,
    wake: Notify,
    on_tick: TickFn,
}

/// An interval timer that survives suspension.
///
/// While suspended the timer keeps its deadline. Resuming re-arms it with the
/// time still owed (`interval - elapsed since last tick`), so a machine that
/// slept through part of an interval neither restarts the full interval nor
/// fires a burst of missed ticks: an overdue timer fires exactly once, then
/// continues on its normal cadence. Time the machine spent asleep is
/// recovered from the wall clock on resume.
///
/// Tick callbacks are spawned, not awaited; the timer never waits for a
/// previous callback before scheduling the next tick.
///
/// Dropping the timer stops it. Callbacks already running are not cancelled.
pub struct WakeableTimer {
    shared: Arc<TimerShared>,
}

/// Weak reference used by condition watchers so they never keep a timer alive.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Weak<TimerShared>,
}

impl WakeableTimer {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, on_tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let interval = clamp_interval(&name, interval);
        let now = Instant::now();
        let on_tick: TickFn = Arc::new(move || on_tick().boxed());
        Self {
            shared: Arc::new(TimerShared {
                name,
                schedule: Mutex::new(Schedule {
                    state: TimerState::Stopped,
                    interval,
                    last_executed: now,
                    next_due: now + interval,
                    suspended: None,
                    driver: None,
                }),
                conditions: Mutex::new(Vec::new()),
                wake: Notify::new(),
                on_tick,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Schedules the first tick after `initial_delay` (default: the interval).
    ///
    /// No-op while running; from `Suspended` this behaves like [`resume`](Self::resume).
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, initial_delay: Option<Duration>) {
        self.shared.start(initial_delay);
    }

    /// Pauses ticking, keeping the current deadline. No-op unless running.
    pub fn suspend(&self) {
        self.shared.suspend(SuspendCause::Manual);
    }

    /// Re-arms a suspended timer with the time still owed. No-op unless suspended.
    pub fn resume(&self) {
        self.shared.resume();
    }

    /// Treats "now" as the last execution, pushing the next tick a full
    /// interval out. Used after an out-of-band run of the tick's work.
    pub fn reset(&self) {
        self.shared.reset();
    }

    /// Cancels the pending tick. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> TimerState {
        self.shared.lock_schedule().state
    }

    pub fn interval(&self) -> Duration {
        self.shared.lock_schedule().interval
    }

    /// Changes the interval, re-measuring the pending tick from the last execution.
    pub fn set_interval(&self, interval: Duration) {
        self.shared.set_interval(interval);
    }

    /// Time until the next tick; `None` when stopped.
    pub fn remaining(&self) -> Option<Duration> {
        let schedule = self.shared.lock_schedule();
        match schedule.state {
            TimerState::Stopped => None,
            _ => Some(schedule.next_due.saturating_duration_since(Instant::now())),
        }
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(super) fn attach_condition(&self, condition: Condition, check_before_tick: bool) {
        self.shared.lock_conditions().push(Attached {
            condition,
            check_before_tick,
        });
    }
}

impl Drop for WakeableTimer {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl TimerHandle {
    pub fn state(&self) -> Option<TimerState> {
        self.shared.upgrade().map(|s| s.lock_schedule().state)
    }

    /// Reacts to an attached condition changing. Returns `false` once the
    /// timer has been dropped.
    pub(super) fn on_condition_changed(&self, condition: &Condition, met: bool) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        if met {
            shared.resume_when_clear();
        } else {
            tracing::debug!(timer = %shared.name, condition = condition.name(), "Suspending on unmet condition");
            shared.suspend(SuspendCause::Condition);
        }
        true
    }

    pub(super) fn detach_condition(&self, condition: &Condition) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .lock_conditions()
                .retain(|a| !a.condition.same_signal(condition));
        }
    }
}

impl TimerShared {
    fn lock_schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_conditions(&self) -> MutexGuard<'_, Vec<Attached>> {
        self.conditions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>, initial_delay: Option<Duration>) {
        let mut schedule = self.lock_schedule();
        match schedule.state {
            TimerState::Running => {}
            TimerState::Suspended => {
                drop(schedule);
                self.resume();
            }
            TimerState::Stopped => {
                let now = Instant::now();
                schedule.last_executed = now;
                schedule.next_due = now + initial_delay.unwrap_or(schedule.interval);
                schedule.suspended = None;
                schedule.state = TimerState::Running;
                if let Some(old) = schedule.driver.take() {
                    old.abort();
                }
                schedule.driver = Some(tokio::spawn(drive(Arc::clone(self))));
                tracing::trace!(timer = %self.name, "Timer started");
            }
        }
    }

    fn suspend(&self, cause: SuspendCause) {
        let mut schedule = self.lock_schedule();
        if schedule.state != TimerState::Running {
            return;
        }
        schedule.state = TimerState::Suspended;
        schedule.suspended = Some((Instant::now(), SystemTime::now(), cause));
        drop(schedule);
        self.wake.notify_one();
    }

    fn resume(&self) {
        let mut schedule = self.lock_schedule();
        if schedule.state != TimerState::Suspended {
            return;
        }

        if let Some((mono_at, wall_at, _)) = schedule.suspended.take() {
            // The monotonic clock may not advance while the machine sleeps;
            // the wall clock does. The difference is time owed to the schedule.
            let mono_elapsed = mono_at.elapsed();
            if let Ok(wall_elapsed) = wall_at.elapsed() {
                let slept = wall_elapsed.saturating_sub(mono_elapsed);
                if slept >= SLEEP_THRESHOLD {
                    let now = Instant::now();
                    schedule.next_due = schedule.next_due.checked_sub(slept).unwrap_or(now);
                    schedule.last_executed = schedule.last_executed.checked_sub(slept).unwrap_or(now);
                    tracing::debug!(timer = %self.name, slept_secs = slept.as_secs(), "Corrected for system sleep");
                }
            }
        }

        schedule.state = TimerState::Running;
        drop(schedule);
        self.wake.notify_one();
    }

    /// Resumes a condition-suspended timer once every attached condition holds.
    fn resume_when_clear(&self) {
        let clear = self.lock_conditions().iter().all(|a| a.condition.is_met());
        if !clear {
            return;
        }
        let cause = self.lock_schedule().suspended.map(|(_, _, cause)| cause);
        if cause == Some(SuspendCause::Condition) {
            tracing::debug!(timer = %self.name, "Conditions met, resuming");
            self.resume();
        }
    }

    fn reset(&self) {
        let mut schedule = self.lock_schedule();
        if schedule.state == TimerState::Stopped {
            return;
        }
        let now = Instant::now();
        schedule.last_executed = now;
        schedule.next_due = now + schedule.interval;
        drop(schedule);
        self.wake.notify_one();
    }

    fn stop(&self) {
        let mut schedule = self.lock_schedule();
        if let Some(driver) = schedule.driver.take() {
            driver.abort();
        }
        if schedule.state != TimerState::Stopped {
            schedule.state = TimerState::Stopped;
            schedule.suspended = None;
            tracing::trace!(timer = %self.name, "Timer stopped");
        }
    }

    fn set_interval(&self, interval: Duration) {
        let interval = clamp_interval(&self.name, interval);
        let mut schedule = self.lock_schedule();
        schedule.interval = interval;
        if schedule.state != TimerState::Stopped {
            schedule.next_due = schedule.last_executed + interval;
        }
        drop(schedule);
        self.wake.notify_one();
    }

    /// Fires the tick if it is due and no pre-tick condition blocks it.
    fn try_fire(&self) {
        let mut schedule = self.lock_schedule();
        let now = Instant::now();
        if schedule.state != TimerState::Running || now < schedule.next_due {
            return;
        }

        let blocked = self
            .lock_conditions()
            .iter()
            .find(|a| a.check_before_tick && !a.condition.is_met())
            .map(|a| a.condition.name());
        if let Some(condition) = blocked {
            tracing::debug!(timer = %self.name, condition, "Condition unmet at tick, suspending");
            schedule.state = TimerState::Suspended;
            schedule.suspended = Some((now, SystemTime::now(), SuspendCause::Condition));
            return;
        }

        schedule.last_executed = now;
        schedule.next_due = now + schedule.interval;
        drop(schedule);

        tokio::spawn((self.on_tick)());
    }
}

fn clamp_interval(name: &str, interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        tracing::warn!(timer = %name, interval_ms = interval.as_millis(), "Interval too short, using minimum");
        MIN_INTERVAL
    } else {
        interval
    }
}

async fn drive(shared: Arc<TimerShared>) {
    loop {
        let due = {
            let schedule = shared.lock_schedule();
            match schedule.state {
                TimerState::Stopped => return,
                TimerState::Running => Some(schedule.next_due),
                TimerState::Suspended => None,
            }
        };

        match due {
            Some(due) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => shared.try_fire(),
                    _ = shared.wake.notified() => {}
                }
            }
            None => shared.wake.notified().await,
        }
    }
}
