//! Connection bootstrap and schema upgrades for the task metadata database.
//!
//! Every store in this crate works over a `rusqlite::Connection` produced by
//! [`open_db`] or [`open_db_in_memory`]. Both apply [`migrations`] before the
//! connection is handed out, so `metadata` and `remote_lists` always match the
//! version recorded in `PRAGMA user_version`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// Opening or configuring the connection failed.
    Sqlite(rusqlite::Error),
    /// A numbered migration failed; the whole upgrade was rolled back.
    Migration {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    /// The file was written by a newer build with more migrations.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl DbError {
    /// Version of the migration that failed, if this is a migration failure.
    pub fn failed_migration(&self) -> Option<u32> {
        match self {
            Self::Migration { version, .. } => Some(*version),
            _ => None,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "taskmeta db: {err}"),
            Self::Migration {
                version,
                name,
                source,
            } => write!(f, "taskmeta db: migration {version:04}_{name} failed: {source}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "taskmeta db: schema version {db_version} is newer than this build ({latest_supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
