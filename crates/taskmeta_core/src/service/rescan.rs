//! Boot/refresh triggered alarm rescan.
//!
//! # Invariants
//! - One `fire` schedules exactly one rescan job.
//! - The job waits for the configured startup delay on the executor, never
//!   on the caller.
//! - The job opens its own connection; failures are logged, never raised.

use crate::config::SchedulerConfig;
use crate::db::{open_db, DbError};
use crate::repo::metadata_repo::SqliteMetadataStore;
use crate::repo::StoreError;
use crate::scheduler::clock::Clock;
use crate::scheduler::executor::{JobHandle, TaskExecutor};
use crate::scheduler::timer::TimerService;
use crate::service::alarm_service::{AlarmScheduler, ScheduleSummary};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Failure of one rescan job.
#[derive(Debug)]
pub enum RescanError {
    Db(DbError),
    Store(StoreError),
}

impl Display for RescanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "rescan could not open database: {err}"),
            Self::Store(err) => write!(f, "rescan failed: {err}"),
        }
    }
}

impl Error for RescanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<DbError> for RescanError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<StoreError> for RescanError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Entry point invoked by the host on boot or refresh events.
pub struct BootRescanTrigger<T, C> {
    db_path: PathBuf,
    timers: Arc<T>,
    clock: Arc<C>,
    config: SchedulerConfig,
}

impl<T, C> BootRescanTrigger<T, C>
where
    T: TimerService + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    pub fn new(
        db_path: impl Into<PathBuf>,
        timers: Arc<T>,
        clock: Arc<C>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            timers,
            clock,
            config,
        }
    }

    /// Schedules one full alarm rescan after the startup delay.
    ///
    /// # Errors
    /// - Returns the executor's error when the job cannot be scheduled.
    pub fn fire<E: TaskExecutor + ?Sized>(&self, executor: &E) -> std::io::Result<JobHandle> {
        let delay = self.config.startup_delay();
        let db_path = self.db_path.clone();
        let timers = Arc::clone(&self.timers);
        let clock = Arc::clone(&self.clock);

        info!(
            "event=boot_rescan module=rescan status=scheduled delay_ms={}",
            delay.as_millis()
        );
        executor.execute_after(
            delay,
            Box::new(move || {
                if let Err(err) = run_rescan(&db_path, timers, clock) {
                    error!("event=boot_rescan module=rescan status=error error={err}");
                }
            }),
        )
    }
}

/// Opens the database at `db_path` and schedules every active alarm.
pub fn run_rescan<T, C>(db_path: &Path, timers: T, clock: C) -> Result<ScheduleSummary, RescanError>
where
    T: TimerService,
    C: Clock,
{
    let conn = open_db(db_path)?;
    let store = SqliteMetadataStore::try_new(&conn)?;
    let summary = AlarmScheduler::new(store, timers, clock).schedule_all_alarms()?;
    info!(
        "event=boot_rescan module=rescan status=ok armed={} cancelled={} unscheduled={} failed={}",
        summary.armed, summary.cancelled, summary.unscheduled, summary.failed
    );
    Ok(summary)
}
