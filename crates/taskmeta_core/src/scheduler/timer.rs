//! Platform timer contract and an in-process implementation.
//!
//! # Responsibility
//! - Key one-shot timers by alarm record identity.
//! - Deliver fired timers to the notification dispatcher.
//!
//! # Invariants
//! - `arm` with a key that already has a pending timer replaces it.
//! - `cancel` never fails for unknown keys.
//! - The dispatcher is invoked outside the internal lock.

use crate::model::alarm::AlarmVariant;
use crate::model::metadata::{MetadataId, TaskId};
use crate::scheduler::clock::Clock;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

const TIMER_THREAD_NAME: &str = "taskmeta-timers";
// Upper bound on one wait so wall-clock jumps are picked up.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Timer identity derived from an alarm record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey(MetadataId);

impl TimerKey {
    pub fn for_alarm(alarm_id: MetadataId) -> Self {
        Self(alarm_id)
    }

    pub fn alarm_id(self) -> MetadataId {
        self.0
    }
}

impl Display for TimerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "alarm-{}", self.0)
    }
}

/// Data carried by an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmPayload {
    pub task_id: TaskId,
    pub variant: AlarmVariant,
}

/// Notice delivered when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmNotice {
    pub task_id: TaskId,
    pub variant: AlarmVariant,
    pub alarm_id: MetadataId,
}

/// Receives fired alarms. Rendering and delivery are up to the host.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notice: AlarmNotice);
}

impl<D: NotificationDispatcher + ?Sized> NotificationDispatcher for Arc<D> {
    fn dispatch(&self, notice: AlarmNotice) {
        (**self).dispatch(notice);
    }
}

pub type TimerResult<T> = Result<T, TimerError>;

/// Timer service failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The service is shut down or otherwise cannot accept calls.
    Unavailable(String),
}

impl Display for TimerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "timer service unavailable: {message}"),
        }
    }
}

impl Error for TimerError {}

/// One-shot timer service keyed by `TimerKey`.
pub trait TimerService {
    /// Arms a timer firing at `fire_at_ms`, replacing any pending timer for `key`.
    fn arm(&self, key: TimerKey, fire_at_ms: i64, payload: AlarmPayload) -> TimerResult<()>;

    /// Cancels the pending timer for `key`, if any.
    fn cancel(&self, key: TimerKey) -> TimerResult<()>;
}

impl<T: TimerService + ?Sized> TimerService for &T {
    fn arm(&self, key: TimerKey, fire_at_ms: i64, payload: AlarmPayload) -> TimerResult<()> {
        (**self).arm(key, fire_at_ms, payload)
    }

    fn cancel(&self, key: TimerKey) -> TimerResult<()> {
        (**self).cancel(key)
    }
}

impl<T: TimerService + ?Sized> TimerService for Arc<T> {
    fn arm(&self, key: TimerKey, fire_at_ms: i64, payload: AlarmPayload) -> TimerResult<()> {
        (**self).arm(key, fire_at_ms, payload)
    }

    fn cancel(&self, key: TimerKey) -> TimerResult<()> {
        (**self).cancel(key)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    fire_at_ms: i64,
    payload: AlarmPayload,
}

#[derive(Default)]
struct TimerState {
    pending: HashMap<TimerKey, PendingTimer>,
    shutdown: bool,
}

impl TimerState {
    fn next_due(&self) -> Option<(TimerKey, i64)> {
        self.pending
            .iter()
            .min_by_key(|(key, timer)| (timer.fire_at_ms, **key))
            .map(|(key, timer)| (*key, timer.fire_at_ms))
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timer service backed by one background thread.
///
/// Timers live in memory only; after a process restart the boot rescan
/// re-arms them from persisted alarms.
pub struct InProcessTimerService {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl InProcessTimerService {
    /// Starts the timer thread.
    ///
    /// # Errors
    /// - Returns the OS error when the thread cannot be spawned.
    pub fn start<D, C>(dispatcher: D, clock: C) -> std::io::Result<Self>
    where
        D: NotificationDispatcher + 'static,
        C: Clock + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || run_timer_loop(&worker_shared, &dispatcher, &clock))?;

        info!("event=timer_service_start module=scheduler status=ok");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Returns the number of timers waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Returns the fire time of the pending timer for `key`.
    pub fn pending_fire_time(&self, key: TimerKey) -> Option<i64> {
        self.shared
            .lock()
            .pending
            .get(&key)
            .map(|timer| timer.fire_at_ms)
    }

    /// Stops the timer thread. Pending timers are dropped without firing.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.pending.clear();
        }
        self.shared.wake.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("event=timer_service_stop module=scheduler status=error error_code=worker_panicked");
                return;
            }
            info!("event=timer_service_stop module=scheduler status=ok");
        }
    }
}

impl TimerService for InProcessTimerService {
    fn arm(&self, key: TimerKey, fire_at_ms: i64, payload: AlarmPayload) -> TimerResult<()> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(TimerError::Unavailable("service is shut down".to_string()));
        }
        if self.worker.as_ref().map_or(true, JoinHandle::is_finished) {
            return Err(TimerError::Unavailable("timer thread stopped".to_string()));
        }
        let replaced = state
            .pending
            .insert(
                key,
                PendingTimer {
                    fire_at_ms,
                    payload,
                },
            )
            .is_some();
        drop(state);
        self.shared.wake.notify_one();

        debug!("event=timer_arm module=scheduler status=ok key={key} fire_at_ms={fire_at_ms} replaced={replaced}");
        Ok(())
    }

    fn cancel(&self, key: TimerKey) -> TimerResult<()> {
        let removed = self.shared.lock().pending.remove(&key).is_some();
        if removed {
            self.shared.wake.notify_one();
        }
        debug!("event=timer_cancel module=scheduler status=ok key={key} removed={removed}");
        Ok(())
    }
}

impl Drop for InProcessTimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer_loop(shared: &Shared, dispatcher: &dyn NotificationDispatcher, clock: &dyn Clock) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }

        let Some((key, fire_at_ms)) = state.next_due() else {
            state = shared
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = clock.now_ms();
        if fire_at_ms > now {
            let until_due = Duration::from_millis(u64::try_from(fire_at_ms - now).unwrap_or(u64::MAX));
            let (guard, _) = shared
                .wake
                .wait_timeout(state, until_due.min(MAX_WAIT))
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            continue;
        }

        let Some(timer) = state.pending.remove(&key) else {
            continue;
        };
        drop(state);

        let notice = AlarmNotice {
            task_id: timer.payload.task_id,
            variant: timer.payload.variant,
            alarm_id: key.alarm_id(),
        };
        // A panicking dispatcher costs one notice, never the worker.
        if catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(notice))).is_err() {
            error!("event=timer_fire module=scheduler status=error error_code=dispatch_panicked key={key}");
        } else {
            info!(
                "event=timer_fire module=scheduler status=ok key={key} late_ms={}",
                now.saturating_sub(timer.fire_at_ms)
            );
        }

        state = shared.lock();
    }
}
