use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::definition::PipelineDefinition;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0 when the server is enabled
/// - Crucible prefetch is at least 1
/// - Recipe and pipeline names are unique, recipes are named
/// - Every pipeline has a source or a recipe
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.enabled && config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.crucible.prefetch == 0 {
        return Err(ConfigError::ValidationError(
            "crucible.prefetch must be at least 1".to_string(),
        ));
    }

    let mut recipe_names = HashSet::new();
    for recipe in &config.recipes {
        let name = recipe.name.as_deref().ok_or_else(|| {
            ConfigError::ValidationError("every recipe needs a name".to_string())
        })?;
        if !recipe_names.insert(name) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate recipe name: {}",
                name
            )));
        }
    }

    let mut pipeline_names = HashSet::new();
    for pipeline in &config.pipelines {
        if let Some(name) = pipeline.name.as_deref() {
            if !pipeline_names.insert(name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate pipeline name: {}",
                    name
                )));
            }
        }
        validate_pipeline(pipeline)?;
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineDefinition) -> Result<(), ConfigError> {
    if pipeline.source.is_none() && pipeline.recipe.is_none() {
        return Err(ConfigError::ValidationError(format!(
            "pipeline '{}' needs a source or a recipe",
            pipeline.display_name()
        )));
    }
    Ok(())
}
