//! Reading [`Config`] from disk and the environment.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Variables starting with this prefix override values from the file.
const ENV_PREFIX: &str = "REELFORGE_";

/// Read `path` as TOML, then layer `REELFORGE_*` variables on top.
///
/// Sections are separated by `__`: `REELFORGE_QUEUE__WORKERS=8` sets
/// `queue.workers`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::from(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
}

/// Parse a config document. The environment is not consulted.
pub fn load_config_from_str(source: &str) -> Result<Config, ConfigError> {
    toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))
}
