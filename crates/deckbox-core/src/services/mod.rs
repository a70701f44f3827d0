//! Services shared by every deckbox client

mod storage;
mod sync_support;

pub use storage::StorageService;
pub use sync_support::RemoteApply;
