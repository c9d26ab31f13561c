//! Runtime settings for the relay and the offline worker, resolved from the manifest.

use anyhow::anyhow;
use shellrelay_core::error::EdgeError;
use shellrelay_core::manifest::{Manifest, DEFAULT_UPSTREAM_BINDING};

/// Cache generation the worker owns. Bumping it is the only way to migrate cached assets.
pub const DEFAULT_GENERATION: &str = "ace-clouds-v1";

/// Hosts whose name contains this marker are API hosts and go network-first.
pub const DEFAULT_API_HOST_MARKER: &str = "workers.dev";

/// Location the shell entries are resolved against when the manifest does not set one.
pub const DEFAULT_SCOPE: &str = "http://127.0.0.1:8787/";

pub const DEFAULT_SHELL: [&str; 4] = [
    "./",
    "./index.html",
    "./manifest.json",
    "https://fonts.googleapis.com/css2?family=Plus+Jakarta+Sans:wght@400;500;600;700;800&family=JetBrains+Mono:wght@400;500&display=swap",
];

/// Where the relay finds its upstream base URL.
///
/// The process environment is read on every [`UpstreamBinding::resolve`] call, so a changed
/// value takes effect on the next request. A manifest `value` is the fallback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamBinding {
    name: String,
    env: Option<String>,
    fallback: Option<String>,
}

impl UpstreamBinding {
    /// Binding that reads the environment variable of the same name.
    pub fn from_env<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        let name = name.into();
        Self {
            env: Some(name.clone()),
            name,
            fallback: None,
        }
    }

    /// Binding with a fixed value and no environment lookup.
    pub fn fixed<S, V>(name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            env: None,
            fallback: Some(value.into()),
        }
    }

    /// Resolve `[relay] upstream` against the manifest's `[[binding]]` list.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let name = manifest.upstream_binding();
        match manifest.binding(name) {
            Some(binding) => Self {
                name: binding.name.clone(),
                env: Some(binding.env_key().to_string()),
                fallback: binding.value.clone(),
            },
            None => Self::from_env(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env_key(&self) -> Option<&str> {
        self.env.as_deref()
    }

    /// Current value from the process environment, else the fallback.
    pub fn resolve(&self) -> Result<String, EdgeError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// [`UpstreamBinding::resolve`] with a caller-supplied variable lookup. Blank values count
    /// as unset.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<String, EdgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = self
            .env
            .as_deref()
            .and_then(lookup)
            .filter(|value| !value.trim().is_empty());

        from_env
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                EdgeError::internal(anyhow!("upstream binding `{}` is not set", self.name))
            })
    }
}

impl Default for UpstreamBinding {
    fn default() -> Self {
        Self::from_env(DEFAULT_UPSTREAM_BINDING)
    }
}

/// Offline worker configuration. Shell entries may be relative; they resolve against `scope`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfflineConfig {
    pub generation: String,
    pub scope: String,
    pub api_host_marker: String,
    pub shell: Vec<String>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            generation: DEFAULT_GENERATION.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            api_host_marker: DEFAULT_API_HOST_MARKER.to_string(),
            shell: DEFAULT_SHELL.iter().map(|entry| entry.to_string()).collect(),
        }
    }
}

impl OfflineConfig {
    /// Defaults overridden by the manifest's `[offline]` section.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let offline = &manifest.offline;
        let defaults = Self::default();
        Self {
            generation: offline.generation.clone().unwrap_or(defaults.generation),
            scope: offline.scope.clone().unwrap_or(defaults.scope),
            api_host_marker: offline
                .api_host_marker
                .clone()
                .unwrap_or(defaults.api_host_marker),
            shell: offline.shell.clone().unwrap_or(defaults.shell),
        }
    }
}
