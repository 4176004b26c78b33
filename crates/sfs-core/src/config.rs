use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Glob patterns skipped when walking a collection's physical tree.
    pub ignore_patterns: Vec<String>,
    /// File name of the metadata database inside the catalog's `.sfs` directory.
    pub db_file: String,
    pub confirm_deletions: bool,
    /// Marker inserted into the name of a source entry kept with `keep-both`.
    pub keep_both_marker: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            db_file: "catalog.db".to_string(),
            confirm_deletions: true,
            keep_both_marker: "merged".to_string(),
        }
    }
}

/// Load `Config.{toml,json,yaml}` from the working directory if present,
/// then overlay `SFS_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("SFS").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
