pub mod harvest;
pub mod pipeline;
pub mod sinks;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use harvest::{HarvestDeps, Harvester};
pub use pipeline::stats::{RejectReason, RunSummary};
