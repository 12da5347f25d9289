//! Configuration loading

use anyhow::{Context, Result};
use curio_core::{AcceptPolicy, LightingConfiguration, SessionRequest, VoiceSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub narration: VoiceSettings,
    /// Initial lighting; clamped into range on load
    #[serde(default)]
    pub lighting: Option<LightingConfiguration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory holding the static frontend
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    /// How long XR probes and session requests wait on the browser client
    #[serde(default = "default_timeout")]
    pub client_reply_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
            client_reply_timeout_secs: default_timeout(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_static_dir() -> String {
    "web".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Http,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Storage REST endpoint (http kind)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bucket name (http kind)
    #[serde(default)]
    pub bucket: String,
    /// Library root inside the store
    #[serde(default = "default_root")]
    pub root: String,
    /// Object holding model history text, hidden from the library
    #[serde(default = "default_metadata_object")]
    pub metadata_object: String,
    /// Local library (directory kind)
    #[serde(default = "default_directory")]
    pub directory: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            base_url: default_base_url(),
            bucket: String::new(),
            root: default_root(),
            metadata_object: default_metadata_object(),
            directory: default_directory(),
            request_timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    curio_store::DEFAULT_BASE_URL.to_string()
}

fn default_root() -> String {
    "/".to_string()
}

fn default_metadata_object() -> String {
    curio_core::metadata::DEFAULT_METADATA_OBJECT.to_string()
}

fn default_directory() -> String {
    "./library".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Which upload extensions are accepted
    #[serde(default)]
    pub accept: AcceptPolicy,
    #[serde(default = "default_xr_mode")]
    pub xr_mode: String,
    #[serde(default = "default_required_features")]
    pub required_features: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            accept: AcceptPolicy::default(),
            xr_mode: default_xr_mode(),
            required_features: default_required_features(),
        }
    }
}

fn default_xr_mode() -> String {
    SessionRequest::default().mode
}

fn default_required_features() -> Vec<String> {
    SessionRequest::default().required_features
}

impl ViewerConfig {
    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            mode: self.xr_mode.clone(),
            required_features: self.required_features.clone(),
        }
    }
}

impl Config {
    /// Lighting to start the scene with
    pub fn initial_lighting(&self) -> LightingConfiguration {
        self.lighting.clone().unwrap_or_default().sanitized()
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curio_core::LightMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/curio.toml")).unwrap();
        assert_eq!(config.daemon.bind, "0.0.0.0:8080");
        assert_eq!(config.store.kind, StoreKind::Http);
        assert_eq!(config.store.metadata_object, "metadata.json");
        assert_eq!(config.viewer.accept, AcceptPolicy::Viewer);
        assert_eq!(config.viewer.session_request(), SessionRequest::default());
        assert_eq!(config.narration, VoiceSettings::default());
        assert_eq!(config.initial_lighting(), LightingConfiguration::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[store]
kind = "directory"
directory = "/srv/models"

[viewer]
accept = "editor"

[narration]
rate = 0.8

[lighting]
mode = "spotlight"
ambient = {{ intensity = 7.5 }}
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.store.kind, StoreKind::Directory);
        assert_eq!(config.store.directory, "/srv/models");
        assert_eq!(config.store.root, "/");
        assert_eq!(config.viewer.accept, AcceptPolicy::Editor);
        assert_eq!(config.narration.rate, 0.8);
        assert_eq!(config.narration.lang, "en-US");

        let lighting = config.initial_lighting();
        assert_eq!(lighting.mode(), LightMode::Spotlight);
        assert_eq!(lighting.ambient().intensity, 2.0);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[store]\nkind = \"ftp\"\n").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
