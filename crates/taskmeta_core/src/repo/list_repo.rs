//! Remote list roster persistence.
//!
//! # Invariants
//! - `local_id` is assigned on insert and never changes.
//! - `(list_type, remote_id)` is unique.
//! - Loads are ordered by `ordinal`, then `local_id`.

use crate::model::remote_list::{ListId, ListRecord};
use crate::repo::{ensure_table, StoreError, StoreResult};
use rusqlite::{params, Connection, Row};
use std::sync::Arc;

/// Persistence substrate for mirrored remote lists.
pub trait ListStore {
    /// Loads every list of one type.
    fn load_lists(&self, list_type: &str) -> StoreResult<Vec<ListRecord>>;

    /// Inserts a new list and returns it with its local id.
    fn insert_list(
        &self,
        list_type: &str,
        remote_id: &str,
        display_name: &str,
        ordinal: u32,
    ) -> StoreResult<ListRecord>;

    /// Rewrites name and ordinal of an existing list.
    fn update_list(&self, record: &ListRecord) -> StoreResult<()>;

    /// Deletes one list. Returns `false` when it did not exist.
    fn delete_list(&self, local_id: ListId) -> StoreResult<bool>;
}

impl<S: ListStore + ?Sized> ListStore for &S {
    fn load_lists(&self, list_type: &str) -> StoreResult<Vec<ListRecord>> {
        (**self).load_lists(list_type)
    }

    fn insert_list(
        &self,
        list_type: &str,
        remote_id: &str,
        display_name: &str,
        ordinal: u32,
    ) -> StoreResult<ListRecord> {
        (**self).insert_list(list_type, remote_id, display_name, ordinal)
    }

    fn update_list(&self, record: &ListRecord) -> StoreResult<()> {
        (**self).update_list(record)
    }

    fn delete_list(&self, local_id: ListId) -> StoreResult<bool> {
        (**self).delete_list(local_id)
    }
}

impl<S: ListStore + ?Sized> ListStore for Arc<S> {
    fn load_lists(&self, list_type: &str) -> StoreResult<Vec<ListRecord>> {
        (**self).load_lists(list_type)
    }

    fn insert_list(
        &self,
        list_type: &str,
        remote_id: &str,
        display_name: &str,
        ordinal: u32,
    ) -> StoreResult<ListRecord> {
        (**self).insert_list(list_type, remote_id, display_name, ordinal)
    }

    fn update_list(&self, record: &ListRecord) -> StoreResult<()> {
        (**self).update_list(record)
    }

    fn delete_list(&self, local_id: ListId) -> StoreResult<bool> {
        (**self).delete_list(local_id)
    }
}

/// SQLite-backed list store.
#[derive(Clone, Copy)]
pub struct SqliteListStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteListStore<'conn> {
    /// Constructs a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_table(conn, "remote_lists")?;
        Ok(Self { conn })
    }
}

impl ListStore for SqliteListStore<'_> {
    fn load_lists(&self, list_type: &str) -> StoreResult<Vec<ListRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, list_type, remote_id, display_name, ordinal
             FROM remote_lists
             WHERE list_type = ?1
             ORDER BY ordinal ASC, local_id ASC;",
        )?;
        let mut rows = stmt.query([list_type])?;
        let mut lists = Vec::new();
        while let Some(row) = rows.next()? {
            lists.push(parse_list_row(row)?);
        }
        Ok(lists)
    }

    fn insert_list(
        &self,
        list_type: &str,
        remote_id: &str,
        display_name: &str,
        ordinal: u32,
    ) -> StoreResult<ListRecord> {
        self.conn.execute(
            "INSERT INTO remote_lists (list_type, remote_id, display_name, ordinal)
             VALUES (?1, ?2, ?3, ?4);",
            params![list_type, remote_id, display_name, ordinal],
        )?;

        Ok(ListRecord {
            local_id: self.conn.last_insert_rowid(),
            list_type: list_type.to_string(),
            remote_id: remote_id.to_string(),
            display_name: display_name.to_string(),
            ordinal,
        })
    }

    fn update_list(&self, record: &ListRecord) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE remote_lists
             SET
                remote_id = ?2,
                display_name = ?3,
                ordinal = ?4
             WHERE local_id = ?1;",
            params![
                record.local_id,
                record.remote_id.as_str(),
                record.display_name.as_str(),
                record.ordinal,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "remote list",
                id: record.local_id,
            });
        }
        Ok(())
    }

    fn delete_list(&self, local_id: ListId) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM remote_lists WHERE local_id = ?1;", [local_id])?;
        Ok(changed > 0)
    }
}

fn parse_list_row(row: &Row<'_>) -> StoreResult<ListRecord> {
    Ok(ListRecord {
        local_id: row.get("local_id")?,
        list_type: row.get("list_type")?,
        remote_id: row.get("remote_id")?,
        display_name: row.get("display_name")?,
        ordinal: row.get("ordinal")?,
    })
}
