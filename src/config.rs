use std::{collections::HashMap, path::Path};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Settings file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "packlink.toml";

/// Tool settings from `packlink.toml` and `PACKLINK_BUILD_*` variables.
/// Environment variables take precedence over the file.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PacklinkConfig {
    pub prefix: Option<String>,
    pub strict: Option<bool>,
    pub default_loader: Option<String>,
    pub include_dep_tests: Option<bool>,
}

impl PacklinkConfig {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(Some(&root.join(CONFIG_FILE_NAME)), None)?;

        Ok(Self {
            prefix: raw_config.prefix,
            strict: raw_config.strict,
            default_loader: raw_config.default_loader,
            include_dep_tests: raw_config.include_dep_tests,
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    prefix: Option<String>,
    strict: Option<bool>,
    default_loader: Option<String>,
    include_dep_tests: Option<bool>,
}

impl RawConfig {
    fn load(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(false));
        }
        builder
            .add_source(Environment::with_prefix("PACKLINK_BUILD").source(env))
            .build()?
            .try_deserialize()
    }
}
