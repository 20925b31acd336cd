//! Configuration loading — multiple formats, env substitution.
//!
//! Auto-detects the format from the file extension, substitutes `${VAR}` /
//! `$VAR` references, then layers `TUTTI_`-prefixed environment variables on
//! top of the file contents.

use config::{Config as Cfg, Environment, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Detect configuration format from file extension.
pub fn detect_format(path: &str) -> OrchestratorResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            OrchestratorError::ConfigError("no file extension found".to_string())
        })?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(OrchestratorError::ConfigError(format!(
            "unsupported config format: {ext}"
        ))),
    }
}

/// Substitute environment variables in a string.
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME` syntax; unknown variables are
/// left as-is.
pub fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern");
    result = re_braced
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("static pattern");
    result = re_simple
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    result
}

/// Load a configuration file, layering `TUTTI_`-prefixed env vars on top.
pub fn load_config<T>(path: &str) -> OrchestratorResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| OrchestratorError::ConfigError(format!("read {path}: {e}")))?;

    let substituted = substitute_env_vars(&content);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .add_source(Environment::with_prefix("TUTTI").separator("__"))
        .build()
        .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| OrchestratorError::ConfigError(e.to_string()))
}

/// Parse configuration from a string with explicit format.
pub fn from_str<T>(content: &str, format: FileFormat) -> OrchestratorResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);
    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| OrchestratorError::ConfigError(e.to_string()))
}
