//! Remote list roster synchronization.
//!
//! # Responsibility
//! - Define the remote list-fetch boundary.
//! - Mirror the fetched roster into local list records.
//!
//! # Invariants
//! - Roster updates are mutually exclusive and applied to the cache atomically.
//! - Lookups never trigger a remote fetch.

pub mod remote;
pub mod roster;
