// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Section-based loading of `trx-rs.toml`.
//!
//! Every daemon owns one `[<name>]` table of the shared file. Lookup order:
//! 1. Path given on the command line
//! 2. `./trx-rs.toml`
//! 3. `$XDG_CONFIG_HOME/trx-rs/trx-rs.toml`
//! 4. `/etc/trx-rs/trx-rs.toml`

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Invalid configuration in {0}: {1}")]
    Invalid(String, String),
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("trx-rs.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("trx-rs").join("trx-rs.toml"));
    }
    paths.push(PathBuf::from("/etc/trx-rs/trx-rs.toml"));
    paths
}

/// Parse `content` and deserialize the `key` table, if present.
fn section_from_str<T: DeserializeOwned>(
    path: &Path,
    content: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let parse_err = |e: &dyn std::fmt::Display| ConfigError::ParseError(path.to_path_buf(), e.to_string());

    let mut table: toml::Table = toml::from_str(content).map_err(|e| parse_err(&e))?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };
    // Going through `try_into` keeps serde defaults for omitted fields.
    section.try_into::<T>().map(Some).map_err(|e| parse_err(&e))
}

fn section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    section_from_str(path, &content, key)
}

/// A daemon configuration stored as one section of `trx-rs.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key, e.g. `"trx-rxd"`.
    fn section_key() -> &'static str;

    /// Semantic checks run after parsing.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Load the section from `path`; a missing section is an error.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// First default location holding the section, or `Default` when none does.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if !path.exists() {
                continue;
            }
            if let Some(cfg) = section_from_file::<Self>(&path, Self::section_key())? {
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Load from an explicit path or the default locations, then validate.
    fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let (cfg, found) = match explicit {
            Some(path) => (Self::load_from_file(path)?, Some(path.to_path_buf())),
            None => Self::load_from_default_paths()?,
        };
        cfg.validate().map_err(|e| {
            let origin = found
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string());
            ConfigError::Invalid(origin, e)
        })?;
        Ok((cfg, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        rate: u32,
        name: String,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                rate: 48_000,
                name: "default".to_string(),
            }
        }
    }

    impl ConfigFile for Sample {
        fn section_key() -> &'static str {
            "sample"
        }

        fn validate(&self) -> Result<(), String> {
            if self.rate == 0 {
                return Err("rate must be > 0".to_string());
            }
            Ok(())
        }
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_section_defaults_fill_missing_fields() {
        let file = write_config("[sample]\nrate = 96000\n");
        let cfg = Sample::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.rate, 96_000);
        assert_eq!(cfg.name, "default");
    }

    #[test]
    fn test_missing_section_is_error() {
        let file = write_config("[other]\nrate = 1\n");
        let err = Sample::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("missing [sample] section"));
    }

    #[test]
    fn test_load_runs_validation() {
        let file = write_config("[sample]\nrate = 0\n");
        let err = Sample::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_, _)));
    }

    #[test]
    fn test_unreadable_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Sample::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_, _)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let file = write_config("[sample\nrate = ");
        let err = Sample::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, _)));
    }
}
