//! scorewatch-core: pure data model for the live-score monitor.
//! Records, snapshots, change detection, duplicate merging, retry policy
//! and status reports. No IO, no async.

pub mod catalog;
pub mod diff;
pub mod merge;
pub mod retry;
pub mod types;

pub use catalog::{EntityCatalog, LeagueRef};
pub use diff::detect_changes;
pub use merge::{MatchStatus, RecordMerger, StatusPriorityMerge};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use types::{
    ChangeKind, ChangeRecord, CoreError, MonitorState, MonitorStatus, Record, RegistryStatus,
    ResourceStatus, Snapshot, SourceConfig, WatchDetails,
};
