//! `shellrelay.toml`: which binding holds the upstream URL, how the offline worker is set up,
//! and where the native host listens and logs.

use log::LevelFilter;
use serde::Deserialize;
use validator::Validate;

/// Binding consulted for the upstream base URL when `[relay] upstream` is omitted.
pub const DEFAULT_UPSTREAM_BINDING: &str = "WORKER_URL";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("manifest rejected: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    #[validate(nested)]
    pub app: AppSection,
    #[validate(nested)]
    pub relay: RelaySection,
    #[serde(rename = "binding")]
    #[validate(nested)]
    pub bindings: Vec<Binding>,
    #[validate(nested)]
    pub offline: OfflineSection,
    #[validate(nested)]
    pub server: ServerSection,
    pub logging: LoggingSection,
}

impl Manifest {
    pub fn parse(source: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Name of the binding that holds the upstream base URL.
    pub fn upstream_binding(&self) -> &str {
        self.relay
            .upstream
            .as_deref()
            .unwrap_or(DEFAULT_UPSTREAM_BINDING)
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct AppSection {
    #[validate(length(min = 1))]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySection {
    #[validate(length(min = 1))]
    pub upstream: Option<String>,
}

/// A named value read from the process environment, with an optional literal fallback.
/// Secrets are never logged.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Binding {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub secret: bool,
    /// Environment variable to read; defaults to `name`.
    #[serde(default)]
    #[validate(length(min = 1))]
    pub env: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl Binding {
    pub fn env_key(&self) -> &str {
        self.env.as_deref().unwrap_or(&self.name)
    }
}

/// Offline worker overrides. Unset fields keep the worker's built-in defaults.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct OfflineSection {
    #[validate(length(min = 1))]
    pub generation: Option<String>,
    #[validate(url)]
    pub scope: Option<String>,
    #[validate(length(min = 1))]
    pub api_host_marker: Option<String>,
    pub shell: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    #[validate(length(min = 1))]
    pub addr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: LogLevel,
    pub echo_stdout: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            echo_stdout: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}
