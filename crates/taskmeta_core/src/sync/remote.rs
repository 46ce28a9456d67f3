//! Remote list-fetch boundary.

use crate::model::remote_list::RemoteList;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Error envelope returned by a list-fetch adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFetchError {
    /// Stable machine-readable code, e.g. `auth_expired`.
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RemoteFetchError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl Display for RemoteFetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "remote list fetch failed [{}] (retryable={}): {}",
            self.code, self.retryable, self.message
        )
    }
}

impl Error for RemoteFetchError {}

/// Fetches the complete ordered roster of remote lists.
pub trait RemoteListSource {
    fn fetch_lists(&self) -> Result<Vec<RemoteList>, RemoteFetchError>;
}
