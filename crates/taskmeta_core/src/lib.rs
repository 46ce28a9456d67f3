//! Task metadata core: attribute records, alarm scheduling and remote list rosters.
//! This crate is the single source of truth for reconciliation invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod scheduler;
pub mod service;
pub mod sync;

pub use config::{ConfigError, CoreConfig, RosterConfig, SchedulerConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{init_logging, logging_status, LogLevel, LoggingConfig, LoggingError};
pub use model::alarm::{AlarmRecord, AlarmVariant, NO_ALARM};
pub use model::metadata::{
    AttributeValue, KindScope, MetadataDraft, MetadataId, MetadataRecord, MetadataSnapshot,
    MetadataValidationError, TaskId,
};
pub use model::remote_list::{ListId, ListRecord, RemoteList};
pub use repo::list_repo::{ListStore, SqliteListStore};
pub use repo::metadata_repo::{MetadataQuery, MetadataStore, SqliteMetadataStore};
pub use repo::{StoreError, StoreResult};
pub use scheduler::clock::{Clock, SystemClock};
pub use scheduler::executor::{ImmediateExecutor, TaskExecutor, ThreadExecutor};
pub use scheduler::timer::{
    AlarmNotice, AlarmPayload, InProcessTimerService, NotificationDispatcher, TimerError,
    TimerKey, TimerResult, TimerService,
};
pub use service::alarm_service::{AlarmScheduler, AlarmState, ScheduleSummary};
pub use service::reconcile::{ReconcileError, ReconcileOutcome, ReconciliationEngine};
pub use service::rescan::{run_rescan, BootRescanTrigger, RescanError};
pub use sync::remote::{RemoteFetchError, RemoteListSource};
pub use sync::roster::{ListSyncReconciler, RosterError, RosterUpdate};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
