//! Nested composition: stage chains and whole pipelines used as sources.

use crate::cabinet::{BuildContext, SourceJar, StageJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::Flow;

/// Applies the `transmutes` list left to right inside one stage slot.
pub struct TransmutesStageJar;

impl StageJar for TransmutesStageJar {
    fn new_stage(
        &self,
        spec: &JarSpec,
        build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        let stages = spec
            .spec_list("transmutes")?
            .ok_or_else(|| FlowError::missing("transmutes"))?;
        Ok(build.composer.chain(&stages, build.definition, input))
    }
}

/// Uses the pipeline under `transmutation` as a source.
///
/// The nested pipeline is composed with its own name, defaulting to the
/// name of the pipeline that embeds it.
pub struct TransmutationSourceJar;

impl SourceJar for TransmutationSourceJar {
    fn new_source(&self, spec: &JarSpec, build: &BuildContext<'_>) -> Result<Flow, FlowError> {
        let mut nested = spec
            .definition_option("transmutation")?
            .ok_or_else(|| FlowError::missing("transmutation"))?;
        if nested.name.is_none() {
            nested.name = build.definition.name.clone();
        }
        Ok(build.composer.compose(&nested))
    }
}
