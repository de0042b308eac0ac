//! Reconciliation between the local working copy and the remote store.

pub mod client;
pub mod coordinator;

pub use self::client::{PullResult, RemoteSyncClient, SyncError};
pub use self::coordinator::{LoadOutcome, PullReport, SyncCoordinator, SyncRecord, WriteOutcome};
