//! Content-addressed reconciliation of metadata records.
//!
//! # Responsibility
//! - Diff a desired set of drafts against persisted rows of one parent/scope.
//! - Delete rows with no desired match and insert drafts with no persisted match.
//!
//! # Invariants
//! - Matching uses `MetadataSnapshot` equality; row ids are ignored.
//! - Identical desired drafts coalesce into one persisted row.
//! - Matched rows are untouched, so their id and creation time survive.
//! - `on_before_delete` runs for a row before its delete is issued.
//! - Inserts run only after the scan and all deletes have finished.
//! - Invalid drafts reject the whole call before any mutation.

use crate::model::metadata::{
    KindScope, MetadataDraft, MetadataRecord, MetadataSnapshot, MetadataValidationError, TaskId,
};
use crate::repo::metadata_repo::{MetadataQuery, MetadataStore};
use crate::repo::StoreError;
use crate::scheduler::clock::Clock;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reconciliation failure.
#[derive(Debug)]
pub enum ReconcileError {
    /// A desired draft was malformed; nothing was mutated.
    Validation(MetadataValidationError),
    /// Storage failed mid-pass; the pass was abandoned.
    Store(StoreError),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "invalid desired record: {err}"),
            Self::Store(err) => write!(f, "reconciliation storage failure: {err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<MetadataValidationError> for ReconcileError {
    fn from(value: MetadataValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for ReconcileError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub deleted: usize,
    /// Persisted rows that matched a desired draft.
    pub retained: usize,
}

impl ReconcileOutcome {
    /// Whether any insert or delete happened.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.deleted > 0
    }
}

/// Diff/apply engine over a metadata store.
pub struct ReconciliationEngine<S, C> {
    store: S,
    clock: C,
}

impl<S: MetadataStore, C: Clock> ReconciliationEngine<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Makes the rows of `task_id` within `scope` equal to `desired`.
    ///
    /// `on_before_delete` is called synchronously with each row about to be
    /// deleted, e.g. to cancel a timer keyed by the row id.
    ///
    /// # Errors
    /// - `Validation` when any draft is malformed or outside `scope`.
    /// - `Store` when a scan, delete or insert fails; earlier mutations of
    ///   the pass stay applied.
    pub fn reconcile<I>(
        &self,
        task_id: TaskId,
        scope: &KindScope,
        desired: I,
        on_before_delete: &mut dyn FnMut(&MetadataRecord),
    ) -> ReconcileResult<ReconcileOutcome>
    where
        I: IntoIterator<Item = MetadataDraft>,
    {
        let started_at = Instant::now();
        let mut pending = normalize_desired(scope, desired).map_err(|err| {
            warn!(
                "event=metadata_reconcile module=reconcile status=error error_code=invalid_desired task={task_id} scope={scope} error={err}"
            );
            err
        })?;

        let mut outcome = ReconcileOutcome::default();
        let query = MetadataQuery::for_task(task_id, scope.clone());
        let scanned = self.store.scan(&query, &mut |item| {
            let record = item?;
            if pending.remove(&record.snapshot()).is_some() {
                outcome.retained += 1;
                return Ok(());
            }

            on_before_delete(&record);
            if self.store.delete(record.id)? {
                outcome.deleted += 1;
                debug!(
                    "event=metadata_delete module=reconcile status=ok task={task_id} id={} kind={}",
                    record.id, record.kind
                );
            } else {
                debug!(
                    "event=metadata_delete module=reconcile status=skip task={task_id} id={} reason=not_found",
                    record.id
                );
            }
            Ok(())
        });
        if let Err(err) = scanned {
            return Err(log_store_failure(task_id, scope, "scan", err));
        }

        let now_ms = self.clock.now_ms();
        for (snapshot, created_at_ms) in pending {
            let draft = MetadataDraft {
                kind: snapshot.kind,
                attributes: snapshot.attributes,
                created_at_ms: Some(created_at_ms.unwrap_or(now_ms)),
            };
            match self.store.persist(task_id, &draft) {
                Ok(record) => {
                    outcome.inserted += 1;
                    debug!(
                        "event=metadata_insert module=reconcile status=ok task={task_id} id={} kind={}",
                        record.id, record.kind
                    );
                }
                Err(err) => return Err(log_store_failure(task_id, scope, "insert", err)),
            }
        }

        info!(
            "event=metadata_reconcile module=reconcile status=ok task={task_id} scope={scope} inserted={} deleted={} retained={} duration_ms={}",
            outcome.inserted,
            outcome.deleted,
            outcome.retained,
            started_at.elapsed().as_millis()
        );
        Ok(outcome)
    }
}

/// Validates drafts and coalesces them into a snapshot-keyed set.
///
/// When duplicates carry different creation times the first one wins.
fn normalize_desired<I>(
    scope: &KindScope,
    desired: I,
) -> Result<BTreeMap<MetadataSnapshot, Option<i64>>, MetadataValidationError>
where
    I: IntoIterator<Item = MetadataDraft>,
{
    let mut pending = BTreeMap::new();
    for draft in desired {
        draft.validate()?;
        if !scope.contains(&draft.kind) {
            return Err(MetadataValidationError::KindOutOfScope {
                kind: draft.kind,
                scope: scope.to_string(),
            });
        }
        pending
            .entry(draft.snapshot())
            .or_insert(draft.created_at_ms);
    }
    Ok(pending)
}

fn log_store_failure(
    task_id: TaskId,
    scope: &KindScope,
    stage: &'static str,
    err: StoreError,
) -> ReconcileError {
    error!(
        "event=metadata_reconcile module=reconcile status=error error_code=store_failed stage={stage} task={task_id} scope={scope} error={err}"
    );
    ReconcileError::Store(err)
}
