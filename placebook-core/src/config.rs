use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlacebookConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub moderation: ModerationSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl PlacebookConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.database)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    #[serde(default = "default_database")]
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// Radius used by `places_within` when the caller gives none.
    #[serde(default = "default_radius_meters")]
    pub default_radius_meters: f64,
    /// First ring searched by `find_near`; doubled until the query is satisfied.
    #[serde(default = "default_initial_ring_meters")]
    pub initial_ring_meters: f64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_radius_meters: default_radius_meters(),
            initial_ring_meters: default_initial_ring_meters(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationSection {
    #[serde(default)]
    pub reset_rejected_on_owner_edit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_database() -> String {
    "directory.sqlite".to_string()
}

fn default_radius_meters() -> f64 {
    5_000.0
}

fn default_initial_ring_meters() -> f64 {
    1_000.0
}

fn default_log_filter() -> String {
    "placebook_core=info,placebookctl=info".to_string()
}

pub fn load_placebook_config<P: AsRef<Path>>(path: P) -> Result<PlacebookConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
