//! The cabinet: registered source and stage jars, looked up by name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::composer::Composer;
use crate::config::{JarConfig, JarsConfig};
use crate::definition::{JarSpec, PipelineDefinition};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::jars;

/// What a jar sees while it is being built into a flow.
pub struct BuildContext<'a> {
    /// Composer for jars that resolve nested specs.
    pub composer: &'a Composer,
    /// The pipeline being composed.
    pub definition: &'a PipelineDefinition,
}

impl BuildContext<'_> {
    pub fn pipeline(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }
}

/// Produces a source flow from a spec.
pub trait SourceJar: Send + Sync {
    fn new_source(&self, spec: &JarSpec, build: &BuildContext<'_>) -> Result<Flow, FlowError>;
}

/// Wraps an input flow into a stage flow.
pub trait StageJar: Send + Sync {
    fn new_stage(
        &self,
        spec: &JarSpec,
        build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError>;
}

struct Registered<J: ?Sized> {
    jar: Arc<J>,
    enabled: bool,
    defaults: Map<String, Value>,
}

impl<J: ?Sized> Registered<J> {
    fn new(jar: Arc<J>) -> Self {
        Self {
            jar,
            enabled: true,
            defaults: Map::new(),
        }
    }

    fn apply(&mut self, settings: &JarConfig) {
        self.enabled = settings.enabled;
        self.defaults = settings.defaults.clone();
    }
}

/// A resolved jar plus the cabinet defaults for its options.
pub struct ResolvedJar<J: ?Sized> {
    pub jar: Arc<J>,
    pub defaults: Map<String, Value>,
}

/// Registry of every available jar.
#[derive(Default)]
pub struct Cabinet {
    sources: HashMap<String, Registered<dyn SourceJar>>,
    stages: HashMap<String, Registered<dyn StageJar>>,
}

impl Cabinet {
    /// An empty cabinet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cabinet holding every built-in jar.
    pub fn with_builtin_jars() -> Self {
        let mut cabinet = Self::new();
        jars::register_builtin(&mut cabinet);
        cabinet
    }

    pub fn register_source(&mut self, name: impl Into<String>, jar: Arc<dyn SourceJar>) {
        self.sources.insert(name.into(), Registered::new(jar));
    }

    pub fn register_stage(&mut self, name: impl Into<String>, jar: Arc<dyn StageJar>) {
        self.stages.insert(name.into(), Registered::new(jar));
    }

    /// Applies per-jar settings. Settings for unregistered jars are ignored.
    pub fn configure(mut self, config: &JarsConfig) -> Self {
        for settings in &config.sources {
            if let Some(registered) = self.sources.get_mut(&settings.name) {
                registered.apply(settings);
            }
        }
        for settings in &config.stages {
            if let Some(registered) = self.stages.get_mut(&settings.name) {
                registered.apply(settings);
            }
        }
        info!(
            sources = %self.source_names().join(","),
            stages = %self.stage_names().join(","),
            "Cabinet configured"
        );
        self
    }

    /// Looks up an enabled source jar.
    pub fn source(&self, name: &str) -> Option<ResolvedJar<dyn SourceJar>> {
        self.sources
            .get(name)
            .filter(|r| r.enabled)
            .map(|r| ResolvedJar {
                jar: Arc::clone(&r.jar),
                defaults: r.defaults.clone(),
            })
    }

    /// Looks up an enabled stage jar.
    pub fn stage(&self, name: &str) -> Option<ResolvedJar<dyn StageJar>> {
        self.stages
            .get(name)
            .filter(|r| r.enabled)
            .map(|r| ResolvedJar {
                jar: Arc::clone(&r.jar),
                defaults: r.defaults.clone(),
            })
    }

    /// Names of enabled source jars, sorted.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, r)| r.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of enabled stage jars, sorted.
    pub fn stage_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stages
            .iter()
            .filter(|(_, r)| r.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
