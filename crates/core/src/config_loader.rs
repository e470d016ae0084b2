use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Environment prefix. Nested keys use `__`, e.g. `SWING_SIZING__MAX_LOTS=10`.
pub const ENV_PREFIX: &str = "SWING_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` and `SWING_*` variables
    /// on top of built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config", None)
    }

    /// Loads configuration with `config/Config.{profile}.toml` layered over
    /// the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::load_from("config", Some(profile))
    }

    /// Same as [`ConfigLoader::load_with_profile`] with an explicit config
    /// directory. Missing files are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file or variable fails to parse.
    pub fn load_from(dir: impl AsRef<Path>, profile: Option<&str>) -> Result<AppConfig> {
        let dir = dir.as_ref();
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.join("Config.toml")));
        if let Some(profile) = profile {
            figment = figment.merge(Toml::file(dir.join(format!("Config.{profile}.toml"))));
        }
        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
