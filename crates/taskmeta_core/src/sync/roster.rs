//! Cached roster of lists mirrored from a remote sync service.
//!
//! # Responsibility
//! - Lazily load the local roster once and serve lookups from memory.
//! - Reconcile the local roster against a freshly fetched remote roster.
//!
//! # Invariants
//! - Local records are matched by `remote_id`; `local_id` never changes.
//! - The cache is swapped only after every write of a pass was attempted.
//! - `update_roster` holds the write lock for the whole pass, so readers see
//!   either the previous or the new roster.
//! - A failed write keeps the cache consistent with what storage holds.

use crate::config::RosterConfig;
use crate::model::remote_list::{ListId, ListRecord, RemoteList};
use crate::repo::list_repo::ListStore;
use crate::repo::{StoreError, StoreResult};
use crate::sync::remote::{RemoteFetchError, RemoteListSource};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

/// Counts from one roster pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterUpdate {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Repeated remote ids ignored after their first occurrence.
    pub skipped_duplicates: usize,
    /// Writes that failed and were left for the next pass.
    pub failed: usize,
}

/// Failure of `ListSyncReconciler::refresh`.
#[derive(Debug)]
pub enum RosterError {
    Fetch(RemoteFetchError),
    Store(StoreError),
}

impl Display for RosterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "roster storage failure: {err}"),
        }
    }
}

impl Error for RosterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<RemoteFetchError> for RosterError {
    fn from(value: RemoteFetchError) -> Self {
        Self::Fetch(value)
    }
}

impl From<StoreError> for RosterError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Owner of the local roster cache for one list type.
pub struct ListSyncReconciler<S> {
    store: S,
    list_type: String,
    cache: RwLock<Option<Vec<ListRecord>>>,
}

impl<S: ListStore> ListSyncReconciler<S> {
    pub fn new(store: S, config: &RosterConfig) -> Self {
        Self::with_list_type(store, config.list_type.clone())
    }

    pub fn with_list_type(store: S, list_type: impl Into<String>) -> Self {
        Self {
            store,
            list_type: list_type.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn list_type(&self) -> &str {
        &self.list_type
    }

    /// Whether the cache has been populated.
    pub fn is_loaded(&self) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns a snapshot of the cached roster in roster order.
    pub fn lists(&self) -> StoreResult<Vec<ListRecord>> {
        self.with_roster(<[ListRecord]>::to_vec)
    }

    pub fn by_remote_id(&self, remote_id: &str) -> StoreResult<Option<ListRecord>> {
        self.with_roster(|lists| {
            lists
                .iter()
                .find(|list| list.remote_id == remote_id)
                .cloned()
        })
    }

    pub fn by_local_id(&self, local_id: ListId) -> StoreResult<Option<ListRecord>> {
        self.with_roster(|lists| lists.iter().find(|list| list.local_id == local_id).cloned())
    }

    /// Display name of the list mirrored from `remote_id`, if known.
    pub fn list_name(&self, remote_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .by_remote_id(remote_id)?
            .map(|list| list.display_name))
    }

    /// Fetches the remote roster and applies it.
    ///
    /// # Errors
    /// - `Fetch` when the remote call fails; the cache is left untouched.
    /// - `Store` when the local roster cannot be loaded.
    pub fn refresh(&self, source: &dyn RemoteListSource) -> Result<RosterUpdate, RosterError> {
        let remote = source.fetch_lists().map_err(|err| {
            warn!(
                "event=roster_fetch module=sync status=error list_type={} code={} retryable={}",
                self.list_type, err.code, err.retryable
            );
            err
        })?;
        Ok(self.update_roster(&remote)?)
    }

    /// Reconciles the local roster against `remote`.
    ///
    /// Entries are matched by remote id; matched records get the remote title
    /// and their position as ordinal, unmatched entries become new records,
    /// and local records absent from `remote` are deleted.
    ///
    /// # Errors
    /// - Returns the store error when the local roster cannot be loaded;
    ///   nothing is written in that case. Individual write failures are
    ///   logged and counted in `RosterUpdate::failed` instead.
    pub fn update_roster(&self, remote: &[RemoteList]) -> StoreResult<RosterUpdate> {
        let started_at = Instant::now();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        let previous = match cache.take() {
            Some(lists) => lists,
            None => self.load()?,
        };
        let mut previously_known: BTreeSet<ListId> =
            previous.iter().map(|list| list.local_id).collect();
        let mut seen_remote_ids: HashSet<&str> = HashSet::with_capacity(remote.len());
        let mut next = Vec::with_capacity(remote.len());
        let mut summary = RosterUpdate::default();

        for (position, entry) in remote.iter().enumerate() {
            if !seen_remote_ids.insert(entry.remote_id.as_str()) {
                summary.skipped_duplicates += 1;
                warn!(
                    "event=roster_update module=sync status=skip list_type={} reason=duplicate_remote_id position={position}",
                    self.list_type
                );
                continue;
            }
            let ordinal = u32::try_from(position).unwrap_or(u32::MAX);

            match previous.iter().find(|list| list.remote_id == entry.remote_id) {
                Some(existing) => {
                    previously_known.remove(&existing.local_id);
                    let refreshed = ListRecord {
                        display_name: entry.title.clone(),
                        ordinal,
                        ..existing.clone()
                    };
                    if refreshed == *existing {
                        summary.unchanged += 1;
                        next.push(refreshed);
                        continue;
                    }

                    match self.store.update_list(&refreshed) {
                        Ok(()) => {
                            summary.updated += 1;
                            next.push(refreshed);
                        }
                        Err(err) => {
                            summary.failed += 1;
                            error!(
                                "event=roster_update module=sync status=error error_code=update_failed local_id={} error={err}",
                                existing.local_id
                            );
                            next.push(existing.clone());
                        }
                    }
                }
                None => match self.store.insert_list(
                    &self.list_type,
                    &entry.remote_id,
                    &entry.title,
                    ordinal,
                ) {
                    Ok(created) => {
                        summary.created += 1;
                        debug!(
                            "event=roster_update module=sync status=ok action=create local_id={} ordinal={ordinal}",
                            created.local_id
                        );
                        next.push(created);
                    }
                    Err(err) => {
                        summary.failed += 1;
                        error!(
                            "event=roster_update module=sync status=error error_code=insert_failed position={position} error={err}"
                        );
                    }
                },
            }
        }

        for local_id in previously_known {
            match self.store.delete_list(local_id) {
                Ok(true) => summary.deleted += 1,
                Ok(false) => debug!(
                    "event=roster_update module=sync status=skip action=delete local_id={local_id} reason=not_found"
                ),
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        "event=roster_update module=sync status=error error_code=delete_failed local_id={local_id} error={err}"
                    );
                    if let Some(stale) = previous.iter().find(|list| list.local_id == local_id) {
                        next.push(stale.clone());
                    }
                }
            }
        }

        *cache = Some(next);
        info!(
            "event=roster_update module=sync status=ok list_type={} remote_count={} created={} updated={} unchanged={} deleted={} skipped_duplicates={} failed={} duration_ms={}",
            self.list_type,
            remote.len(),
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.deleted,
            summary.skipped_duplicates,
            summary.failed,
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }

    fn with_roster<R>(&self, read: impl FnOnce(&[ListRecord]) -> R) -> StoreResult<R> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(lists) = cache.as_ref() {
                return Ok(read(lists));
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let lists = match cache.take() {
            Some(lists) => lists,
            None => self.load()?,
        };
        let lists = cache.insert(lists);
        Ok(read(lists.as_slice()))
    }

    fn load(&self) -> StoreResult<Vec<ListRecord>> {
        match self.store.load_lists(&self.list_type) {
            Ok(lists) => {
                info!(
                    "event=roster_load module=sync status=ok list_type={} count={}",
                    self.list_type,
                    lists.len()
                );
                Ok(lists)
            }
            Err(err) => {
                error!(
                    "event=roster_load module=sync status=error list_type={} error={err}",
                    self.list_type
                );
                Err(err)
            }
        }
    }
}
