pub mod cabinet;
pub mod composer;
pub mod config;
pub mod context;
pub mod crucible;
pub mod definition;
pub mod error;
pub mod flow;
pub mod item;
pub mod jars;
pub mod metrics;
pub mod positions;
pub mod recipes;
pub mod testing;

pub use cabinet::{BuildContext, Cabinet, SourceJar, StageJar};
pub use composer::Composer;
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, CrucibleConfig,
    LogFormat, LoggingConfig, PositionsConfig, ServerConfig,
};
pub use context::{PipelineContext, PipelineSpawner};
pub use crucible::{
    Bootstrap, Crucible, CrucibleSummary, PipelineHandle, PipelineOutcome, PipelineState,
    PipelineStatus,
};
pub use definition::{JarSpec, PipelineDefinition};
pub use error::FlowError;
pub use flow::{Flow, ItemStream, Signal, Subscription};
pub use item::{Item, Metadata};
pub use positions::{MemoryPositionStore, PositionStore, SqlitePositionStore, StoreError};
pub use recipes::Recipes;
