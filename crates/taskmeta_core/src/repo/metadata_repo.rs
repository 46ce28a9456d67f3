//! Metadata store contract and SQLite implementation.
//!
//! # Responsibility
//! - Stream metadata rows scoped by parent atom, kind and task activity.
//! - Persist new rows with storage-assigned id and creation time.
//! - Expose rows whose parent atom no longer exists.
//!
//! # Invariants
//! - `scan` is single-pass; the prepared statement lives only for the call
//!   and is released on every exit path, including visitor errors.
//! - Attributes are stored as canonical JSON (sorted keys).

use crate::model::metadata::{
    Attributes, KindScope, MetadataDraft, MetadataId, MetadataRecord, TaskId,
};
use crate::repo::{ensure_table, StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::sync::Arc;
use uuid::Uuid;

// Column order is relied on by `parse_metadata_row`.
const METADATA_COLUMNS: &str = "m.id, m.atom_uuid, m.kind, m.attributes, m.created_at";

// Task activity mirrors the atom lifecycle: a live task that is not finished.
const ACTIVE_TASK_JOIN: &str = " INNER JOIN atoms a
    ON a.uuid = m.atom_uuid
   AND a.type = 'task'
   AND a.is_deleted = 0
   AND (a.task_status IS NULL OR a.task_status NOT IN ('done', 'cancelled'))";

/// Filter for metadata scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataQuery {
    /// Restrict to one parent atom.
    pub task_id: Option<TaskId>,
    pub kinds: KindScope,
    /// Only rows whose parent is an active task.
    pub active_tasks_only: bool,
}

impl MetadataQuery {
    /// Rows of `kinds` attached to one task, regardless of task state.
    pub fn for_task(task_id: TaskId, kinds: KindScope) -> Self {
        Self {
            task_id: Some(task_id),
            kinds,
            active_tasks_only: false,
        }
    }

    /// Rows of `kinds` across all active tasks.
    pub fn active(kinds: KindScope) -> Self {
        Self {
            task_id: None,
            kinds,
            active_tasks_only: true,
        }
    }

    pub fn only_active_tasks(mut self) -> Self {
        self.active_tasks_only = true;
        self
    }
}

/// Visitor invoked once per scanned row. Returning an error stops the scan.
pub type MetadataVisitor<'a> = dyn FnMut(StoreResult<MetadataRecord>) -> StoreResult<()> + 'a;

/// Persistence substrate for metadata records.
pub trait MetadataStore {
    /// Streams matching rows in ascending id order.
    ///
    /// Rows that cannot be decoded are passed to the visitor as `Err` so the
    /// caller decides whether one bad row aborts the pass.
    fn scan(&self, query: &MetadataQuery, visit: &mut MetadataVisitor<'_>) -> StoreResult<()>;

    /// Inserts a new row for `task_id` and returns it with id and timestamp set.
    fn persist(&self, task_id: TaskId, draft: &MetadataDraft) -> StoreResult<MetadataRecord>;

    /// Deletes one row. Returns `false` when the row did not exist.
    fn delete(&self, id: MetadataId) -> StoreResult<bool>;

    /// Returns rows whose parent atom does not exist.
    fn fetch_dangling(&self) -> StoreResult<Vec<MetadataRecord>>;

    /// Collects a scan into memory, failing on the first undecodable row.
    fn list(&self, query: &MetadataQuery) -> StoreResult<Vec<MetadataRecord>> {
        let mut records = Vec::new();
        self.scan(query, &mut |item| {
            records.push(item?);
            Ok(())
        })?;
        Ok(records)
    }
}

impl<S: MetadataStore + ?Sized> MetadataStore for &S {
    fn scan(&self, query: &MetadataQuery, visit: &mut MetadataVisitor<'_>) -> StoreResult<()> {
        (**self).scan(query, visit)
    }

    fn persist(&self, task_id: TaskId, draft: &MetadataDraft) -> StoreResult<MetadataRecord> {
        (**self).persist(task_id, draft)
    }

    fn delete(&self, id: MetadataId) -> StoreResult<bool> {
        (**self).delete(id)
    }

    fn fetch_dangling(&self) -> StoreResult<Vec<MetadataRecord>> {
        (**self).fetch_dangling()
    }
}

impl<S: MetadataStore + ?Sized> MetadataStore for Arc<S> {
    fn scan(&self, query: &MetadataQuery, visit: &mut MetadataVisitor<'_>) -> StoreResult<()> {
        (**self).scan(query, visit)
    }

    fn persist(&self, task_id: TaskId, draft: &MetadataDraft) -> StoreResult<MetadataRecord> {
        (**self).persist(task_id, draft)
    }

    fn delete(&self, id: MetadataId) -> StoreResult<bool> {
        (**self).delete(id)
    }

    fn fetch_dangling(&self) -> StoreResult<Vec<MetadataRecord>> {
        (**self).fetch_dangling()
    }
}

/// SQLite-backed metadata store.
#[derive(Clone, Copy)]
pub struct SqliteMetadataStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMetadataStore<'conn> {
    /// Constructs a store from a migrated connection.
    ///
    /// # Errors
    /// - `MissingRequiredTable` when `metadata` or `atoms` is absent.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_table(conn, "atoms")?;
        ensure_table(conn, "metadata")?;
        Ok(Self { conn })
    }
}

impl MetadataStore for SqliteMetadataStore<'_> {
    fn scan(&self, query: &MetadataQuery, visit: &mut MetadataVisitor<'_>) -> StoreResult<()> {
        let mut sql = format!("SELECT {METADATA_COLUMNS} FROM metadata m");
        let mut bind_values: Vec<Value> = Vec::new();

        if query.active_tasks_only {
            sql.push_str(ACTIVE_TASK_JOIN);
        }
        sql.push_str(" WHERE 1 = 1");

        if let Some(task_id) = query.task_id {
            sql.push_str(" AND m.atom_uuid = ?");
            bind_values.push(Value::Text(task_id.to_string()));
        }

        match &query.kinds {
            KindScope::All => {}
            KindScope::Exact(kind) => {
                sql.push_str(" AND m.kind = ?");
                bind_values.push(Value::Text(kind.clone()));
            }
            KindScope::AnyOf(kinds) if kinds.is_empty() => sql.push_str(" AND 0"),
            KindScope::AnyOf(kinds) => {
                let placeholders = vec!["?"; kinds.len()].join(", ");
                sql.push_str(&format!(" AND m.kind IN ({placeholders})"));
                bind_values.extend(kinds.iter().cloned().map(Value::Text));
            }
        }

        sql.push_str(" ORDER BY m.id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        while let Some(row) = rows.next()? {
            visit(parse_metadata_row(row))?;
        }

        Ok(())
    }

    fn persist(&self, task_id: TaskId, draft: &MetadataDraft) -> StoreResult<MetadataRecord> {
        draft.validate()?;
        let attributes_json = serde_json::to_string(&draft.attributes).map_err(|err| {
            StoreError::InvalidData(format!("cannot encode attributes: {err}"))
        })?;

        let (id, created_at_ms) = self.conn.query_row(
            "INSERT INTO metadata (atom_uuid, kind, attributes, created_at)
             VALUES (?1, ?2, ?3, COALESCE(?4, strftime('%s', 'now') * 1000))
             RETURNING id, created_at;",
            params![
                task_id.to_string(),
                draft.kind.as_str(),
                attributes_json,
                draft.created_at_ms,
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        Ok(MetadataRecord {
            id,
            task_id,
            kind: draft.kind.clone(),
            attributes: draft.attributes.clone(),
            created_at_ms,
        })
    }

    fn delete(&self, id: MetadataId) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM metadata WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    fn fetch_dangling(&self) -> StoreResult<Vec<MetadataRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {METADATA_COLUMNS}
             FROM metadata m
             LEFT JOIN atoms a ON a.uuid = m.atom_uuid
             WHERE a.uuid IS NULL
             ORDER BY m.id ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_metadata_row(row)?);
        }
        Ok(records)
    }
}

fn parse_metadata_row(row: &Row<'_>) -> StoreResult<MetadataRecord> {
    let id: i64 = row.get(0)?;

    let uuid_text: String = row.get(1)?;
    let task_id = Uuid::parse_str(&uuid_text).map_err(|_| {
        StoreError::InvalidData(format!(
            "invalid uuid value `{uuid_text}` in metadata.atom_uuid (id={id})"
        ))
    })?;

    let attributes_text: String = row.get(3)?;
    let attributes: Attributes = serde_json::from_str(&attributes_text).map_err(|err| {
        StoreError::InvalidData(format!("invalid metadata.attributes (id={id}): {err}"))
    })?;

    Ok(MetadataRecord {
        id,
        task_id,
        kind: row.get(2)?,
        attributes,
        created_at_ms: row.get(4)?,
    })
}
