//! Configuration file loading
//!
//! Config structs live in the crates that own them; this module only knows
//! how to turn a file into one of them. The format is picked from the file
//! extension.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Largest config file we are willing to read
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Supported on-disk config formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| {
                Error::Configuration(format!("Config file {:?} has no extension", path))
            })?;

        match ext.as_str() {
            "toml" => Ok(ConfigFormat::Toml),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(Error::Configuration(format!(
                "Unsupported config extension '{}' (expected toml, yaml or json)",
                other
            ))),
        }
    }
}

/// Parse config text in the given format
pub fn parse_config<T: DeserializeOwned>(text: &str, format: ConfigFormat) -> Result<T> {
    match format {
        ConfigFormat::Toml => {
            toml::from_str(text).map_err(|e| Error::Deserialization(e.to_string()))
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| Error::Deserialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(text).map_err(|e| Error::Deserialization(e.to_string()))
        }
    }
}

/// Render a config value in the given format
pub fn render_config<T: Serialize>(value: &T, format: ConfigFormat) -> Result<String> {
    match format {
        ConfigFormat::Toml => {
            toml::to_string_pretty(value).map_err(|e| Error::Serialization(e.to_string()))
        }
        ConfigFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| Error::Serialization(e.to_string()))
        }
    }
}

/// Load a config file, choosing the parser from its extension
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = ConfigFormat::from_path(path)?;

    let size = fs::metadata(path)?.len();
    if size > MAX_CONFIG_BYTES {
        return Err(Error::Configuration(format!(
            "Config file {:?} too large: {} bytes (max {} bytes)",
            path, size, MAX_CONFIG_BYTES
        )));
    }

    let text = fs::read_to_string(path)?;
    parse_config(&text, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        threshold: f32,
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_load_each_format() {
        let dir = TempDir::new().unwrap();
        let sample = Sample { name: "mobilenet".to_string(), threshold: 0.25 };

        for (file, format) in [
            ("c.toml", ConfigFormat::Toml),
            ("c.yaml", ConfigFormat::Yaml),
            ("c.json", ConfigFormat::Json),
        ] {
            let path = dir.path().join(file);
            fs::write(&path, render_config(&sample, format).unwrap()).unwrap();
            let loaded: Sample = load_config(&path).unwrap();
            assert_eq!(loaded, sample);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result: Result<Sample> = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_garbage() {
        let result: Result<Sample> = parse_config("name = [", ConfigFormat::Toml);
        assert!(matches!(result, Err(Error::Deserialization(_))));
    }
}
