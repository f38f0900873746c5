pub mod digest;
pub mod engine;
pub mod filter;
pub mod inventory;
pub mod listing;
pub mod plan;
pub mod reconcile;
pub mod scanner;
pub mod tree;

pub use digest::{Blake3Hasher, ContentHasher, Digest};
pub use engine::{CheckReport, SyncEngine, SyncPlan, SyncReport};
pub use filter::{FilterVerdict, NameFilter, RuleSet};
pub use listing::{ListingRecord, ListingStore, RemoteListing, RemoteParams};
pub use plan::{ActionSummary, SyncAction};
pub use reconcile::{FileClass, ReconcileError, ReconcileOptions, Reconciliation};
pub use scanner::{FileScanner, ScanConfig};
pub use tree::{EntryId, FileMeta, Tree};
