//! Pipeline registry and boot runner.
//!
//! - [`Crucible`] starts composed pipelines on their own tasks, tracks their
//!   state and exposes their completion
//! - [`Bootstrap`] starts the statically configured pipelines and waits for
//!   every pipeline, including ones started later from inside a pipeline

mod bootstrap;
mod registry;
mod types;

pub use bootstrap::Bootstrap;
pub use registry::{Crucible, DEFAULT_PREFETCH};
pub use types::{CrucibleSummary, PipelineHandle, PipelineOutcome, PipelineState, PipelineStatus};
