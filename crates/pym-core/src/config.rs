//! Configuration loading.
//!
//! [`ConfigManager`] describes how a configuration type is located, loaded,
//! and rendered. [`PymConfig`] is the workspace's configuration document:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [cache]
//! backend = "memory"          # or "redis"
//! redis_url = "redis://127.0.0.1/"
//! ttl_secs = 3600
//!
//! [auth]
//! nobody_principal = "nobody"
//! wheel_group_id = 1
//!
//! [acl]
//! default_sortix = 5000
//!
//! [upload]
//! cache_dir = "/tmp/pym/upload_cache"
//! ttl_secs = 86400
//! chunk_size = 65536
//! ```

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PYM_CONFIG";

// ============================================================================
// ConfigManager
// ============================================================================

/// Location, loading, and rendering of a TOML configuration type.
pub trait ConfigManager: Serialize + DeserializeOwned + Default {
    /// Project name, used for the config directory and env var prefix.
    fn project_name() -> &'static str;

    /// Platform default location: `<config dir>/<project>/config.toml`.
    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(Self::project_name()).join("config.toml"))
    }

    /// Resolve the config file: explicit path, then [`CONFIG_ENV_VAR`], then
    /// the platform default.
    fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
            if !p.is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        Self::default_config_path()
    }

    /// Load the configuration. A missing file yields the defaults.
    fn load(explicit: Option<&str>) -> Result<Self> {
        match Self::resolve_config_path(explicit) {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load from a specific file.
    fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))?;
        toml::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Render as pretty TOML.
    fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Flatten into `PROJECT_SECTION_KEY=value` pairs.
    fn to_env_vars(&self) -> Result<Vec<(String, String)>> {
        let value = toml::Value::try_from(self).map_err(|e| Error::config(e.to_string()))?;
        let prefix = Self::project_name().to_uppercase().replace(['-', ' '], "_");
        let mut vars = Vec::new();
        flatten_env(&prefix, &value, &mut vars);
        Ok(vars)
    }
}

fn flatten_env(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = format!("{prefix}_{}", k.to_uppercase().replace('-', "_"));
                flatten_env(&key, v, out);
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        toml::Value::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            out.push((prefix.to_string(), joined));
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

// ============================================================================
// PymConfig
// ============================================================================

/// Which cache backend to construct.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local memory.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
}

/// `[logging]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[cache]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend kind.
    pub backend: CacheBackendKind,
    /// Redis connection URL, used when `backend = "redis"`.
    pub redis_url: String,
    /// Expiry of cached entries in seconds; 0 keeps them until invalidated.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            redis_url: "redis://127.0.0.1/".to_string(),
            ttl_secs: 0,
        }
    }
}

/// `[auth]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Principal of the anonymous sentinel account.
    pub nobody_principal: String,
    /// Group whose members are privileged ("wheel").
    pub wheel_group_id: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nobody_principal: "nobody".to_string(),
            wheel_group_id: 1,
        }
    }
}

/// `[acl]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Sort index given to new entries when none is specified.
    pub default_sortix: i32,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            default_sortix: 5000,
        }
    }
}

/// `[upload]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Root of the staging cache.
    pub cache_dir: PathBuf,
    /// Files older than this many seconds are purged.
    pub ttl_secs: u64,
    /// Copy buffer size in bytes.
    pub chunk_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/tmp/pym/upload_cache"),
            ttl_secs: 60 * 60 * 24,
            chunk_size: 8 * 8192,
        }
    }
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PymConfig {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// ACL settings.
    pub acl: AclConfig,
    /// Upload settings.
    pub upload: UploadConfig,
}

impl ConfigManager for PymConfig {
    fn project_name() -> &'static str {
        "pym"
    }
}

// ============================================================================
// Tests
// ============================================================================
