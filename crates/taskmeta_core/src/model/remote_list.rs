//! Local mirror of lists owned by a remote sync service.

use serde::{Deserialize, Serialize};

/// Local row id of a mirrored list, stable once assigned.
pub type ListId = i64;

/// One remote list as returned by the list-fetch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteList {
    /// External join key.
    pub remote_id: String,
    pub title: String,
}

impl RemoteList {
    pub fn new(remote_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            title: title.into(),
        }
    }
}

/// Persisted local record for one remote list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRecord {
    pub local_id: ListId,
    /// Provider discriminator, e.g. `remote_list`.
    pub list_type: String,
    pub remote_id: String,
    pub display_name: String,
    /// Position in the most recently applied remote roster.
    pub ordinal: u32,
}
