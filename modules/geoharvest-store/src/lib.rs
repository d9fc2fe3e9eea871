pub mod aggregate;
pub mod backend;
pub mod error;
pub mod merge;

pub use aggregate::{Committed, Loaded, Merged, RolledBack, RunState, Validated, Violation};
pub use backend::{atomic_write, FileBackend, MemoryBackend, StoreBackend};
pub use error::{Result, StoreError};
pub use merge::{merge, supersedes, Completeness, MergeReport, COMPLETENESS_PRIORITY};
