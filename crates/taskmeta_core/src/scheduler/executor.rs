//! Delayed-job executors.
//!
//! The boot rescan is handed to an executor together with its startup delay,
//! so callers never block on the delay themselves.

use log::{debug, warn};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_WORKER_NAME: &str = "taskmeta-rescan";

/// Unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs a job once after a delay.
pub trait TaskExecutor {
    /// Schedules `job` to run once after `delay`.
    ///
    /// # Errors
    /// - Returns the OS error when a worker cannot be started.
    fn execute_after(&self, delay: Duration, job: Job) -> std::io::Result<JobHandle>;
}

/// Handle to a scheduled job.
#[derive(Debug)]
pub struct JobHandle {
    inner: JobHandleInner,
}

#[derive(Debug)]
enum JobHandleInner {
    Finished,
    Thread(JoinHandle<()>),
}

impl JobHandle {
    /// Handle for a job that already ran to completion.
    pub fn finished() -> Self {
        Self {
            inner: JobHandleInner::Finished,
        }
    }

    /// Waits for the job. Returns `false` when the job panicked.
    pub fn join(self) -> bool {
        match self.inner {
            JobHandleInner::Finished => true,
            JobHandleInner::Thread(handle) => handle.join().is_ok(),
        }
    }
}

/// Runs each job on its own named worker thread after the delay elapses.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    worker_name: String,
}

impl ThreadExecutor {
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_NAME)
    }
}

impl TaskExecutor for ThreadExecutor {
    fn execute_after(&self, delay: Duration, job: Job) -> std::io::Result<JobHandle> {
        let worker_name = self.worker_name.clone();
        let handle = std::thread::Builder::new()
            .name(self.worker_name.clone())
            .spawn(move || {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                debug!(
                    "event=job_run module=scheduler status=start worker={worker_name} delay_ms={}",
                    delay.as_millis()
                );
                job();
            })
            .map_err(|err| {
                warn!(
                    "event=job_schedule module=scheduler status=error error_code=spawn_failed error={err}"
                );
                err
            })?;

        Ok(JobHandle {
            inner: JobHandleInner::Thread(handle),
        })
    }
}

/// Runs jobs inline on the calling thread and records the requested delays.
///
/// For hosts whose caller is already a background worker that handled its
/// own startup pause.
#[derive(Debug, Default)]
pub struct ImmediateExecutor {
    requested_delays: Mutex<Vec<Duration>>,
}

impl ImmediateExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays passed to `execute_after`, in call order.
    pub fn requested_delays(&self) -> Vec<Duration> {
        self.requested_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskExecutor for ImmediateExecutor {
    fn execute_after(&self, delay: Duration, job: Job) -> std::io::Result<JobHandle> {
        self.requested_delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        job();
        Ok(JobHandle::finished())
    }
}

#[cfg(test)]
mod tests {
    use super::{ImmediateExecutor, TaskExecutor, ThreadExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn thread_executor_waits_for_delay_before_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = Arc::clone(&runs);
        let started = Instant::now();

        let handle = ThreadExecutor::default()
            .execute_after(
                Duration::from_millis(50),
                Box::new(move || {
                    job_runs.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("worker should spawn");

        assert!(handle.join());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_executor_reports_panicking_job() {
        let handle = ThreadExecutor::new("taskmeta-test")
            .execute_after(Duration::ZERO, Box::new(|| panic!("job failure")))
            .expect("worker should spawn");
        assert!(!handle.join());
    }

    #[test]
    fn immediate_executor_runs_inline_and_records_delay() {
        let executor = ImmediateExecutor::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = Arc::clone(&runs);

        let handle = executor
            .execute_after(
                Duration::from_secs(5),
                Box::new(move || {
                    job_runs.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("inline execution never fails");

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.join());
        assert_eq!(executor.requested_delays(), vec![Duration::from_secs(5)]);
    }
}
