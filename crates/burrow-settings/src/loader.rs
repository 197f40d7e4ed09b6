//! Config file resolution and layered loading.
//!
//! One file is loaded, resolved in order: explicit path, project
//! `burrow.toml`, global `~/.config/burrow/burrow.toml`. Environment
//! overrides are applied on top, then the result is validated. Unlike
//! the file search, nothing here is forgiving: an explicit path that
//! does not exist, a file that does not parse, or an override that does
//! not validate all abort startup.

use crate::{BurrowConfig, SettingsError};
use std::path::{Path, PathBuf};

/// Resolves, loads, and validates the effective [`BurrowConfig`].
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the effective configuration.
    ///
    /// With `explicit` set, only that file is considered and it must
    /// exist. Otherwise the project config is preferred over the global
    /// one, and a missing file falls back to built-in defaults.
    /// `BURROW_SOCKS_*` / `BURROW_HTTP_*` environment variables are
    /// applied last, then the whole result is validated.
    ///
    /// # Errors
    /// * `SettingsError::Io` - explicit path unreadable or missing.
    /// * `SettingsError::ParseError` - a config file is not valid TOML.
    /// * `SettingsError::InvalidOverride` - an env override is unusable.
    /// * `SettingsError::Invalid` - the merged result fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<BurrowConfig, SettingsError> {
        Self::load_with_env(explicit, |name| std::env::var(name).ok())
    }

    /// [`ConfigLoader::load`] with an injectable environment, for tests.
    pub fn load_with_env(
        explicit: Option<&Path>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<BurrowConfig, SettingsError> {
        let mut config = match explicit {
            Some(path) => BurrowConfig::load(path)?,
            None => Self::find_config_file()
                .map(|path| BurrowConfig::load(&path))
                .transpose()?
                .unwrap_or_default(),
        };

        config.apply_overrides(var)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing config file in search order, if any.
    pub fn find_config_file() -> Option<PathBuf> {
        let project = Self::project_config_path();
        if project.exists() {
            return Some(project);
        }
        let global = Self::global_config_path();
        global.exists().then_some(global)
    }

    /// Path of the project-level config file.
    pub fn project_config_path() -> PathBuf {
        PathBuf::from("burrow.toml")
    }

    /// Path of the global config file.
    pub fn global_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("burrow")
            .join("burrow.toml")
    }
}
