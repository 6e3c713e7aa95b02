use serde::{Deserialize, Serialize};
use sessionward_auth::LifecycleConfig;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "sessionward.toml";

/// Prefix of environment overrides, e.g. `SESSIONWARD__LIFECYCLE__ISSUER`.
pub const ENV_PREFIX: &str = "SESSIONWARD";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.logging.level.trim().is_empty() {
            anyhow::bail!("logging.level cannot be empty");
        }
        self.lifecycle.validate()?;
        Ok(())
    }
}

pub mod loader {
    use std::path::PathBuf;

    use anyhow::Context;
    use config::{Config, Environment, File};

    use super::{AppConfig, DEFAULT_CONFIG_PATH, ENV_PREFIX};

    /// Loads the configuration file layered with `SESSIONWARD__` overrides.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
        load_config_with_env(path, environment())
    }

    pub(crate) fn load_config_with_env(
        path: Option<&str>,
        env: Environment,
    ) -> anyhow::Result<AppConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    anyhow::bail!("Config file not found: {p}");
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(env);

        let cfg = builder.build().context("config build error")?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .context("config deserialize error")?;
        merged.validate().context("invalid configuration")?;
        Ok(merged)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__")
    }
}
