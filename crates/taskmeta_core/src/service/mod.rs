//! Core use-case services.
//!
//! # Responsibility
//! - Reconcile desired attribute records against persisted rows.
//! - Turn persisted alarms into armed timers.
//! - Wire the delayed boot rescan.
//!
//! # Invariants
//! - Services go through store contracts only; no SQL here.
//! - Callers serialize reconciliation per parent atom; services do not lock.

pub mod alarm_service;
pub mod reconcile;
pub mod rescan;
