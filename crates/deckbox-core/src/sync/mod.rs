//! Sync engine
//!
//! A pass uploads the pending-change queue in FIFO order, then applies the
//! remote deltas since the last checkpoint. Unsynced local work always wins a
//! conflict and goes back on the queue.

mod coordinator;
pub mod resolve;


pub use coordinator::{SyncCoordinator, SyncReport, SyncTrigger};
pub use resolve::{resolve, Decision, LocalState};
