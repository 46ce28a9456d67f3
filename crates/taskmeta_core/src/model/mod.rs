//! Domain model for attribute records, alarms and the remote list roster.
//!
//! # Responsibility
//! - Define the record shapes shared by stores, reconciliation and scheduling.
//! - Provide the canonical, order-independent snapshot used as record identity.
//!
//! # Invariants
//! - Record identity for reconciliation is content (`MetadataSnapshot`), never
//!   the storage row id.
//! - Records are never mutated in place once persisted.

pub mod alarm;
pub mod metadata;
pub mod remote_list;
