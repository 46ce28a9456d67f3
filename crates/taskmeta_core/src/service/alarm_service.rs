//! Alarm scheduling on top of metadata reconciliation.
//!
//! # Responsibility
//! - Persist the desired alarm fire times of a task.
//! - Arm, cancel or skip one timer per persisted alarm.
//! - Rescan all active alarms after boot.
//!
//! # Invariants
//! - Timers are keyed by alarm row id, so re-arming never duplicates.
//! - A deleted alarm's timer is cancelled before its row is deleted.
//! - Past alarms are never re-armed by a rescan.
//! - One failing alarm never stops the rest of a batch.

use crate::model::alarm::{alarm_draft, AlarmRecord, AlarmVariant, ALARM_KIND};
use crate::model::metadata::{KindScope, TaskId};
use crate::repo::metadata_repo::{MetadataQuery, MetadataStore};
use crate::repo::StoreResult;
use crate::scheduler::clock::Clock;
use crate::scheduler::timer::{AlarmPayload, TimerKey, TimerResult, TimerService};
use crate::service::reconcile::{ReconcileError, ReconcileResult, ReconciliationEngine};
use log::{debug, error, info, warn};
use std::time::Instant;

/// Timer state of one alarm after a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    /// Fire time already passed; no timer call was made.
    Unscheduled,
    /// A timer is pending for the alarm.
    Armed,
    /// Sentinel fire time; any pending timer was cancelled.
    Cancelled,
}

/// Counts from one scheduling batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub armed: usize,
    pub cancelled: usize,
    pub unscheduled: usize,
    /// Alarms skipped because they were malformed or the timer call failed.
    pub failed: usize,
}

impl ScheduleSummary {
    fn record(&mut self, state: AlarmState) {
        match state {
            AlarmState::Unscheduled => self.unscheduled += 1,
            AlarmState::Armed => self.armed += 1,
            AlarmState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.armed + self.cancelled + self.unscheduled + self.failed
    }
}

/// Maps persisted alarm records to platform timers.
pub struct AlarmScheduler<S, T, C> {
    store: S,
    timers: T,
    clock: C,
}

impl<S, T, C> AlarmScheduler<S, T, C>
where
    S: MetadataStore,
    T: TimerService,
    C: Clock,
{
    pub fn new(store: S, timers: T, clock: C) -> Self {
        Self {
            store,
            timers,
            clock,
        }
    }

    /// Returns the alarms of one task ordered by fire time.
    ///
    /// Malformed rows are logged and left out.
    pub fn alarms_for_task(&self, task_id: TaskId) -> StoreResult<Vec<AlarmRecord>> {
        let query = MetadataQuery::for_task(task_id, KindScope::exact(ALARM_KIND));
        let mut alarms = Vec::new();
        self.store.scan(&query, &mut |item| {
            let record = item?;
            match AlarmRecord::from_metadata(&record) {
                Ok(alarm) => alarms.push(alarm),
                Err(err) => warn!(
                    "event=alarm_decode module=alarm status=skip task={task_id} id={} error={err}",
                    record.id
                ),
            }
            Ok(())
        })?;
        alarms.sort_by_key(|alarm| (alarm.fire_at_ms, alarm.id));
        Ok(alarms)
    }

    /// Replaces the alarms of `task_id` with `fire_times` (single variant).
    ///
    /// Unchanged fire times keep their rows and timers. When anything
    /// changed, the task's alarms are rescheduled. Returns whether anything
    /// changed.
    ///
    /// # Errors
    /// - `Validation` for a negative fire time; nothing is touched.
    /// - `Store` when persistence fails mid-pass.
    pub fn synchronize_alarms<I>(&self, task_id: TaskId, fire_times: I) -> ReconcileResult<bool>
    where
        I: IntoIterator<Item = i64>,
    {
        let drafts = fire_times
            .into_iter()
            .map(|fire_at_ms| alarm_draft(fire_at_ms, AlarmVariant::Single))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                warn!(
                    "event=alarm_sync module=alarm status=error error_code=invalid_fire_time task={task_id} error={err}"
                );
                ReconcileError::Validation(err)
            })?;

        let engine = ReconciliationEngine::new(&self.store, &self.clock);
        let outcome = engine.reconcile(
            task_id,
            &KindScope::exact(ALARM_KIND),
            drafts,
            &mut |record| {
                let key = TimerKey::for_alarm(record.id);
                if let Err(err) = self.timers.cancel(key) {
                    warn!(
                        "event=timer_cancel module=alarm status=error task={task_id} key={key} error={err}"
                    );
                }
            },
        )?;

        if outcome.changed() {
            if let Err(err) = self.schedule_alarms_for_task(task_id) {
                error!(
                    "event=alarm_schedule module=alarm status=error scope=task task={task_id} error={err}"
                );
            }
        }
        Ok(outcome.changed())
    }

    /// Schedules every alarm whose parent task is active.
    pub fn schedule_all_alarms(&self) -> StoreResult<ScheduleSummary> {
        self.schedule_matching(&MetadataQuery::active(KindScope::exact(ALARM_KIND)), "all")
    }

    /// Schedules the alarms of one task, if the task is active.
    pub fn schedule_alarms_for_task(&self, task_id: TaskId) -> StoreResult<ScheduleSummary> {
        let query =
            MetadataQuery::for_task(task_id, KindScope::exact(ALARM_KIND)).only_active_tasks();
        self.schedule_matching(&query, "task")
    }

    /// Applies the scheduling decision for one alarm.
    ///
    /// - Sentinel fire time: cancel the timer for the alarm.
    /// - Fire time not after now: leave it alone.
    /// - Otherwise: arm (or re-arm) the timer for the alarm.
    pub fn schedule_alarm(&self, alarm: &AlarmRecord) -> TimerResult<AlarmState> {
        let key = TimerKey::for_alarm(alarm.id);

        if alarm.is_no_alarm() {
            self.timers.cancel(key)?;
            debug!(
                "event=alarm_schedule module=alarm status=ok key={key} state=cancelled reason=sentinel"
            );
            return Ok(AlarmState::Cancelled);
        }

        let now_ms = self.clock.now_ms();
        if alarm.fire_at_ms <= now_ms {
            debug!(
                "event=alarm_schedule module=alarm status=skip key={key} state=unscheduled reason=past fire_at_ms={}",
                alarm.fire_at_ms
            );
            return Ok(AlarmState::Unscheduled);
        }

        self.timers.arm(
            key,
            alarm.fire_at_ms,
            AlarmPayload {
                task_id: alarm.task_id,
                variant: alarm.variant,
            },
        )?;
        debug!(
            "event=alarm_schedule module=alarm status=ok key={key} state=armed fire_at_ms={}",
            alarm.fire_at_ms
        );
        Ok(AlarmState::Armed)
    }

    fn schedule_matching(
        &self,
        query: &MetadataQuery,
        scope: &'static str,
    ) -> StoreResult<ScheduleSummary> {
        let started_at = Instant::now();
        let mut summary = ScheduleSummary::default();

        let scanned = self.store.scan(query, &mut |item| {
            let alarm = match item {
                Ok(record) => match AlarmRecord::from_metadata(&record) {
                    Ok(alarm) => alarm,
                    Err(err) => {
                        summary.failed += 1;
                        warn!(
                            "event=alarm_schedule module=alarm status=error error_code=invalid_alarm id={} error={err}",
                            record.id
                        );
                        return Ok(());
                    }
                },
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        "event=alarm_schedule module=alarm status=error error_code=unreadable_row error={err}"
                    );
                    return Ok(());
                }
            };

            match self.schedule_alarm(&alarm) {
                Ok(state) => summary.record(state),
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        "event=alarm_schedule module=alarm status=error error_code=timer_failed id={} error={err}",
                        alarm.id
                    );
                }
            }
            Ok(())
        });

        if let Err(err) = scanned {
            error!(
                "event=alarm_rescan module=alarm status=error scope={scope} processed={} error={err}",
                summary.total()
            );
            return Err(err);
        }

        info!(
            "event=alarm_rescan module=alarm status=ok scope={scope} armed={} cancelled={} unscheduled={} failed={} duration_ms={}",
            summary.armed,
            summary.cancelled,
            summary.unscheduled,
            summary.failed,
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }
}
