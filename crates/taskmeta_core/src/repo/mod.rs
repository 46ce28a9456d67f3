//! Persistence contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the query/persist/delete contracts consumed by reconciliation.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate drafts before SQL mutations.
//! - Read paths report malformed rows instead of masking them.
//! - Deleting a missing row is reported as `false`, never as an error.

pub mod list_repo;
pub mod metadata_repo;

use crate::db::DbError;
use crate::model::metadata::MetadataValidationError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence-layer error shared by metadata and list stores.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Validation(MetadataValidationError),
    NotFound { entity: &'static str, id: i64 },
    InvalidData(String),
    MissingRequiredTable(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "required table `{table}` is missing; run migrations first")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<MetadataValidationError> for StoreError {
    fn from(value: MetadataValidationError) -> Self {
        Self::Validation(value)
    }
}

fn ensure_table(conn: &Connection, table: &'static str) -> StoreResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(StoreError::MissingRequiredTable(table))
    }
}
