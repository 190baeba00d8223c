use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
const DEFAULT_CAPTURE_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// CLI configuration: defaults, then the optional TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Largest Euclidean distance accepted as the same person.
    pub match_threshold: f64,
    /// Descriptor length every embedding must have.
    pub embedding_dim: usize,
    /// Frames to try before giving up on finding a face.
    pub capture_attempts: usize,
}

/// Keys accepted in `config.toml`. Everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f64>,
    embedding_dim: Option<usize>,
    capture_attempts: Option<usize>,
}

impl Config {
    /// Load configuration from the config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = match config_file_path(&env) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "reading config file");
                read_file(&path)?
            }
            None => FileConfig::default(),
        };
        Self::from_sources(file, env)
    }

    fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir(&env).join("rollcall.db"));

        let config = Self {
            db_path,
            match_threshold: env_parse(&env, "ROLLCALL_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            embedding_dim: env_parse(&env, "ROLLCALL_EMBEDDING_DIM")
                .or(file.embedding_dim)
                .unwrap_or(rollcall_core::DEFAULT_EMBEDDING_DIM),
            capture_attempts: env_parse(&env, "ROLLCALL_CAPTURE_ATTEMPTS")
                .or(file.capture_attempts)
                .unwrap_or(DEFAULT_CAPTURE_ATTEMPTS),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold(self.match_threshold)?;
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be at least 1".into()));
        }
        if self.capture_attempts == 0 {
            return Err(ConfigError::Invalid("capture_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// A match threshold must be a positive, finite distance.
pub fn validate_threshold(threshold: f64) -> Result<(), ConfigError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "match threshold must be a positive number, got {threshold}"
        )))
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `ROLLCALL_CONFIG` if set, else `$XDG_CONFIG_HOME/rollcall/config.toml` when it exists.
fn config_file_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = env("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let path = xdg_dir(env, "XDG_CONFIG_HOME", ".config").join("config.toml");
    path.exists().then_some(path)
}

fn data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    xdg_dir(env, "XDG_DATA_HOME", ".local/share")
}

fn xdg_dir(env: &impl Fn(&str) -> Option<String>, var: &str, home_fallback: &str) -> PathBuf {
    env(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(home_fallback)
        })
        .join("rollcall")
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
