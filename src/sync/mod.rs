//! Synchronization engine
//!
//! Reconciles the local item store against a remote target through the file
//! API. The design assumes the dumbest possible remote: a byte store with
//! list, get, put and delete. All reconciliation intelligence lives on the
//! client, so any number of clients can sync through the same target without
//! coordinating with each other.

mod conflict;
mod report;
mod scheduler;
mod synchronizer;

pub use conflict::{classify_push, note_conflict_matters, PushDecision, SyncAction};
pub use report::{ProgressFn, SyncReport};
pub use scheduler::SyncScheduler;
pub use synchronizer::{SyncConfig, SyncOptions, SyncState, Synchronizer, FAIL_SAFE_SETTING};
