use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("ALEMBIC_").ignore(&["config"]).split("_"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[server]
port = 9000

[crucible]
prefetch = 16

[[pipelines]]
name = "numbers"
source = { jar = "values", values = [1, 2, 3] }
transforms = [{ jar = "log", level = "debug" }]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.crucible.prefetch, 16);
        assert_eq!(config.pipelines.len(), 1);

        let pipeline = &config.pipelines[0];
        assert_eq!(pipeline.display_name(), "numbers");
        assert_eq!(pipeline.source.as_ref().unwrap().jar, "values");
        assert_eq!(pipeline.transforms[0].str_option("level").unwrap(), Some("debug"));
    }

    #[test]
    fn test_load_config_from_str_recipes_and_jars() {
        let toml = r#"
[[jars.stages]]
name = "retry"
minBackoff = "1s"
maxBackoff = "30s"

[[jars.sources]]
name = "directory"
enabled = false

[[recipes]]
name = "people"
source = { jar = "jsonl", path = "people.jsonl" }

[[pipelines]]
name = "people-2024"
recipe = "people"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.jars.stages[0].name, "retry");
        assert!(!config.jars.sources[0].enabled);
        assert_eq!(config.recipes[0].display_name(), "people");
        assert_eq!(config.pipelines[0].recipe.as_deref(), Some("people"));
    }

    #[test]
    fn test_load_config_from_str_invalid() {
        let toml = r#"
[server]
port = "not a port"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[positions]
path = "positions.db"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(
            config.positions.path.as_deref(),
            Some(Path::new("positions.db"))
        );
    }
}
