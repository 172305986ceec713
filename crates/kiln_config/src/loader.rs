//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::path::Path;

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|source| ConfigError::Read { path, source })?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.project.sources.is_empty() {
        return Err(ConfigError::ValidationError(
            "project.sources must name at least one directory".to_string(),
        ));
    }
    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "cache.dir must not be empty".to_string(),
        ));
    }
    Ok(())
}
