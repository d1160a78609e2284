//! Configuration Loader
//!
//! Layers an optional configuration file under `ASYNCSQL__SECTION__KEY`
//! environment overrides, then validates the result.

use std::path::Path;

use config::{Config, Environment, File};
use tracing::debug;

use super::AsyncSqlConfig;
use crate::error::Result;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ASYNCSQL";

impl AsyncSqlConfig {
    /// Load from an optional file plus environment overrides.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let path = path.as_ref();
            debug!(path = %path.display(), "Loading asyncsql configuration file");
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AsyncSqlConfig = settings.try_deserialize()?;
        config.validate()?;

        debug!(
            config = %serde_json::to_string(&config).unwrap_or_else(|_| "[serialization error]".to_string()),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::load(None::<&Path>)
    }
}
