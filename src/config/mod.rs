//! TOML-based configuration.
//!
//! Supports a config file with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [service]
//! base_url = "${SERVICE_URL}"
//! # endpoint overrides; derived from base_url when absent
//! # tables_url = "https://example.org/svc/tables"
//!
//! [metadata]
//! policy = "schema-query"   # auto | document | schema-query | two-stage
//! detail = "table"          # full | table | schema
//! maxrec = 100000
//! queue_limit = 32
//! fix_names = true
//! timeout_secs = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::reader::{Detail, MetaPolicy};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Service addressing.
    pub service: ServiceSettings,

    /// Metadata acquisition knobs.
    pub metadata: MetadataSettings,
}

impl Settings {
    /// Parse settings from TOML text, expanding `${ENV_VAR}`
    /// references first.
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let expanded = expand_env_vars(text)?;
        Ok(toml::from_str(&expanded)?)
    }

    /// Load settings from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Settings for a service addressed only by its base URL.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            service: ServiceSettings {
                base_url: base_url.into(),
                ..ServiceSettings::default()
            },
            metadata: MetadataSettings::default(),
        }
    }
}

/// Service addressing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Base URL of the service.
    pub base_url: String,

    /// Listing endpoint override; `{base_url}/tables` when absent.
    pub tables_url: Option<String>,

    /// Synchronous query endpoint override; `{base_url}/sync` when
    /// absent.
    pub sync_url: Option<String>,

    /// Asynchronous job endpoint override; `{base_url}/async` when
    /// absent.
    pub jobs_url: Option<String>,
}

impl ServiceSettings {
    /// Resolve the concrete endpoint set for this service.
    pub fn endpoints(&self) -> ServiceEndpoints {
        let base = self.base_url.trim_end_matches('/').to_string();
        ServiceEndpoints {
            tables: self
                .tables_url
                .clone()
                .unwrap_or_else(|| format!("{base}/tables")),
            sync: self
                .sync_url
                .clone()
                .unwrap_or_else(|| format!("{base}/sync")),
            jobs: self
                .jobs_url
                .clone()
                .unwrap_or_else(|| format!("{base}/async")),
            base,
        }
    }
}

/// Concrete endpoint addresses of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    /// Base address, used as the identifying source string.
    pub base: String,
    /// Hierarchical metadata document / listing endpoint.
    pub tables: String,
    /// Synchronous query endpoint.
    pub sync: String,
    /// Asynchronous job endpoint.
    pub jobs: String,
}

/// Metadata acquisition configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Reader strategy selection.
    pub policy: MetaPolicy,

    /// Detail level requested from listing endpoints.
    pub detail: Detail,

    /// Maximum number of records per catalog query, if limited.
    pub maxrec: Option<u64>,

    /// Bound on queued background metadata requests; beyond it new
    /// requests are dropped.
    pub queue_limit: usize,

    /// Repair non-conformant identifiers reported by the service.
    pub fix_names: bool,

    /// HTTP round-trip timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            policy: MetaPolicy::default(),
            detail: Detail::default(),
            maxrec: None,
            queue_limit: 32,
            fix_names: true,
            timeout_secs: 30,
        }
    }
}

impl MetadataSettings {
    /// Configured HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern"));

/// Expand `${VAR}` references from the process environment. A
/// reference to an unset variable is an error rather than silently
/// expanding to nothing.
pub fn expand_env_vars(text: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for caps in ENV_VAR.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0");
        let name = &caps[1];
        result.push_str(&text[last..whole.start()]);
        match std::env::var(name) {
            Ok(value) => result.push_str(&value),
            Err(_) => return Err(SettingsError::MissingEnvVar(name.to_string())),
        }
        last = whole.end();
    }
    result.push_str(&text[last..]);
    Ok(result)
}
