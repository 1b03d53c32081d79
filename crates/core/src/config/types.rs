use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::definition::PipelineDefinition;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub crucible: CrucibleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub positions: PositionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub jars: JarsConfig,
    /// Named, reusable pipeline fragments
    #[serde(default)]
    pub recipes: Vec<PipelineDefinition>,
    /// Pipelines started at boot
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
}

/// Pipeline registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrucibleConfig {
    /// Whether the configured pipelines are started at boot
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Demand requested from a pipeline per batch
    #[serde(default = "default_prefetch")]
    pub prefetch: u64,
}

impl Default for CrucibleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefetch: default_prefetch(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_prefetch() -> u64 {
    crate::crucible::DEFAULT_PREFETCH
}

/// Status API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8080
}

/// Position store configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PositionsConfig {
    /// SQLite database file; positions are kept in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "alembic=info,alembic_core=info,tower_http=info".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Cabinet configuration: per-jar switches and default options
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JarsConfig {
    #[serde(default)]
    pub sources: Vec<JarConfig>,
    #[serde(default)]
    pub stages: Vec<JarConfig>,
}

/// Settings for one registered jar
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JarConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Options merged under every use-site spec of this jar
    #[serde(flatten)]
    pub defaults: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.crucible.enabled);
        assert_eq!(config.crucible.prefetch, 256);
        assert_eq!(config.server.port, 8080);
        assert!(config.positions.path.is_none());
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.pipelines.is_empty());
    }

    #[test]
    fn test_jar_config_keeps_extra_options() {
        let toml = r#"
name = "retry"
enabled = true
maxAttempts = 3
jitter = 0.0
"#;
        let jar: JarConfig = toml::from_str(toml).unwrap();
        assert_eq!(jar.name, "retry");
        assert_eq!(jar.defaults.len(), 2);
        assert_eq!(jar.defaults["maxAttempts"], 3);
    }
}
