//! Built-in source and stage jars.

mod checkpoint;
mod crucible;
mod flatten;
mod log;
mod one_of;
mod retry;
mod sources;
mod transmutes;

pub use checkpoint::CheckpointStageJar;
pub use crucible::CrucibleStageJar;
pub use flatten::{flatten, flatten_item, FlattenStageJar, Row};
pub use log::LogStageJar;
pub use one_of::{OneOfSourceJar, OneOfStageJar};
pub use retry::{retry_flow, RetryPolicy, RetryStageJar};
pub use sources::{
    file_url, DirectorySourceJar, JsonLinesSourceJar, LinesSourceJar, ValuesReader,
    ValuesSourceJar,
};
pub use transmutes::{TransmutationSourceJar, TransmutesStageJar};

use std::sync::Arc;

use crate::cabinet::Cabinet;

/// Registers every built-in jar under its configuration name.
pub fn register_builtin(cabinet: &mut Cabinet) {
    cabinet.register_source("values", Arc::new(ValuesSourceJar));
    cabinet.register_source("jsonl", Arc::new(JsonLinesSourceJar));
    cabinet.register_source("lines", Arc::new(LinesSourceJar));
    cabinet.register_source("directory", Arc::new(DirectorySourceJar));
    cabinet.register_source("transmutation", Arc::new(TransmutationSourceJar));
    cabinet.register_source("oneOf", Arc::new(OneOfSourceJar));

    cabinet.register_stage("retry", Arc::new(RetryStageJar));
    cabinet.register_stage("oneOf", Arc::new(OneOfStageJar));
    cabinet.register_stage("transmutes", Arc::new(TransmutesStageJar));
    cabinet.register_stage("flatten", Arc::new(FlattenStageJar));
    cabinet.register_stage("crucible", Arc::new(CrucibleStageJar));
    cabinet.register_stage("checkpoint", Arc::new(CheckpointStageJar));
    cabinet.register_stage("log", Arc::new(LogStageJar));
}
