//! Reconciliation core
//!
//! One cycle classifies the deletion tasks referenced by tracked records,
//! cleans up the finished ones, works out how many new tasks may start, finds
//! new eviction candidates and admits as many batches as capacity allows.
//! Nothing is remembered between cycles; every cycle re-reads the stores.

pub mod classify;
pub mod cleanup;
pub mod detect;
pub mod plan;
pub mod reconciler;
pub mod report;

pub use classify::{classify, TaskStatuses};
pub use cleanup::{check_capacity, cleanup_existing_tasks, CleanupOutcome};
pub use detect::{find_expired_by_background, find_orphans};
pub use plan::{admit, Admission, Capacity, EvictionKind, EvictionPlan};
pub use reconciler::Reconciler;
pub use report::{deliver_final_report, CycleReport, EvictionCandidates, Issue};
