//! The main config loading module for fbrowse.
//!
//! Handles loading and deserializing settings from `fbrowse.toml`.
//!
//! Provides the main [Config] struct, as well as the internal [RawConfig] used for parsing.
//! Also implements default config generation for `fbrowse --init`.

use crate::config::{Console, General, InternalGeneral};
use crate::config::{InternalOperations, Operations};
use crate::config::{InternalSearch, Search};
use crate::utils::get_home;

use log::{info, warn};
use serde::Deserialize;

use std::path::{Path, PathBuf};
use std::{fs, io};

/// Raw configuration as read from the toml file.
/// It is converted into the main [Config] struct, which validates and clamps the values.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub(crate) struct RawConfig {
    general: General,
    search: Search,
    operations: Operations,
    console: Console,
}

/// Processed configuration options used by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    general: InternalGeneral,
    search: InternalSearch,
    operations: InternalOperations,
    console: Console,
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        Self {
            general: InternalGeneral::from(raw.general),
            search: InternalSearch::from(raw.search),
            operations: InternalOperations::from(raw.operations),
            console: raw.console,
        }
    }
}

impl Config {
    /// Load configuration from [Config::default_path].
    /// If the file does not exist or fails to parse, returns the default configuration.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!(
                "no config at {}, using internal defaults (tip: run 'fbrowse --init')",
                path.display()
            );
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("error parsing {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<RawConfig>(content).map(Config::from)
    }

    // Getters

    #[inline]
    pub fn general(&self) -> &InternalGeneral {
        &self.general
    }

    #[inline]
    pub fn search(&self) -> &InternalSearch {
        &self.search
    }

    #[inline]
    pub fn operations(&self) -> &InternalOperations {
        &self.operations
    }

    #[inline]
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Determine the default configuration file path.
    /// Checks the FBROWSE_CONFIG environment variable first,
    /// then XDG_CONFIG_HOME,
    /// then defaults to ~/.config/fbrowse/fbrowse.toml.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("FBROWSE_CONFIG") {
            return PathBuf::from(path);
        }

        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg_config).join("fbrowse/fbrowse.toml");
        }

        if let Some(home) = get_home() {
            return home.join(".config/fbrowse/fbrowse.toml");
        }
        PathBuf::from("fbrowse.toml")
    }

    /// Write the default configuration file to `path`.
    /// If the file already exists, returns an error.
    pub fn generate_default(path: &Path) -> io::Result<()> {
        if path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("Config file already exists at {}", path.display()),
            ));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_TOML)?;
        println!("Default config generated at {}", path.display());
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

const DEFAULT_TOML: &str = r##"# fbrowse.toml - default configuration for fbrowse
# Commented values are the internal defaults.

[general]
# show_hidden = false
# dirs_first = true
# case_insensitive = true
# sort = "name"              # "name", "size" or "modified"
# descending = false

[search]
# max_file_size = 10485760   # content search skips larger files
# follow_symlinks = false
# include_hidden = true
# max_results = 2000         # min: 15, max: 1_000_000
# workers = 2

[operations]
# workers = 2                # 1..=8
# progress_interval_ms = 100
# chunk_size = 262144
# conflict = "fail_on_conflict"   # "skip", "overwrite" or "keep_both"

[console]
# shell = "/bin/sh"
"##;

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{ConflictPolicy, SortKey};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let cfg = Config::from_toml("")?;
        assert_eq!(cfg, Config::default());
        assert!(!cfg.general().show_hidden());
        assert_eq!(cfg.search().max_results(), 2000);
        assert_eq!(cfg.operations().conflict(), ConflictPolicy::FailOnConflict);
        assert_eq!(cfg.console().shell(), "/bin/sh");
        Ok(())
    }

    #[test]
    fn generated_file_parses_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(Config::from_toml(DEFAULT_TOML)?, Config::default());
        Ok(())
    }

    #[test]
    fn values_are_validated() -> Result<(), Box<dyn std::error::Error>> {
        let cfg = Config::from_toml(
            r#"
            [general]
            sort = "size"
            descending = true
            show_hidden = true

            [search]
            max_results = 3

            [operations]
            workers = 64
            progress_interval_ms = 250
            conflict = "keep_both"
            "#,
        )?;
        assert_eq!(cfg.general().sort().key, SortKey::Size);
        assert!(cfg.general().sort().descending);
        assert!(cfg.general().entry_filter().show_hidden());
        assert_eq!(cfg.search().max_results(), 15);
        assert_eq!(cfg.operations().workers(), 8);
        let settings = cfg.operations().job_settings();
        assert_eq!(settings.progress_interval, Duration::from_millis(250));
        assert_eq!(settings.default_conflict, ConflictPolicy::KeepBoth);
        Ok(())
    }

    #[test]
    fn unknown_values_fall_back() -> Result<(), Box<dyn std::error::Error>> {
        let cfg = Config::from_toml(
            r#"
            [general]
            sort = "colour"
            [operations]
            conflict = "ask"
            "#,
        )?;
        assert_eq!(cfg.general().sort().key, SortKey::Name);
        assert_eq!(cfg.operations().conflict(), ConflictPolicy::FailOnConflict);
        Ok(())
    }

    #[test]
    fn broken_file_loads_defaults_and_init_refuses_overwrite() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/fbrowse.toml");
        Config::generate_default(&path)?;
        assert!(Config::generate_default(&path).is_err());

        fs::write(&path, "[general\nbroken")?;
        assert_eq!(Config::load_from(&path), Config::default());
        assert_eq!(Config::load_from(&dir.path().join("missing.toml")), Config::default());
        Ok(())
    }
}
