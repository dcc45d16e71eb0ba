//! JSON configuration files.
//!
//! Both processes read an optional JSON file; command line flags are applied
//! on top by the binaries.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Load a JSON config file into `T`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_json::from_str(&text).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded config from {}", path.display());
    Ok(value)
}

/// Load a JSON config file, falling back to `T::default()` when no path is given.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => load_json(path),
        None => Ok(T::default()),
    }
}

/// Write `value` as pretty JSON, creating parent directories as needed.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let write_error = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(write_error)?;
    debug!("Saved config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        name: String,
        rate_hz: u32,
    }

    fn temp_path(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("amethyst-{name}-{unique}"))
            .join("config.json")
    }

    #[test]
    fn save_then_load_returns_same_value() {
        let path = temp_path("roundtrip");
        let sample = Sample {
            name: "driver".to_string(),
            rate_hz: 90,
        };
        save_json(&path, &sample).unwrap();
        let loaded: Sample = load_json(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let path = temp_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "rate_hz": 60 }"#).unwrap();
        let loaded: Sample = load_json(&path).unwrap();
        assert_eq!(loaded.rate_hz, 60);
        assert!(loaded.name.is_empty());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_json::<Sample>(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let path = temp_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ rate_hz: ").unwrap();
        let err = load_json::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn no_path_yields_default() {
        let loaded: Sample = load_json_or_default(None).unwrap();
        assert_eq!(loaded, Sample::default());
    }
}
