use alembic_core::{Config, Crucible};

/// Shared application state
pub struct AppState {
    config: Config,
    config_hash: String,
    crucible: Crucible,
}

impl AppState {
    pub fn new(config: Config, config_hash: String, crucible: Crucible) -> Self {
        Self {
            config,
            config_hash,
            crucible,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Short SHA-256 of the loaded configuration
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn crucible(&self) -> &Crucible {
        &self.crucible
    }
}
