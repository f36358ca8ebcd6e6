//! Where the client looks up the API key sent as `X-API-Key`.
//!
//! The key is resolved on every `send_stream` call, so a key saved while the
//! program runs is picked up by the next query.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Name of the API key entry in the local settings file.
pub const API_KEY_SETTING: &str = "rag_api_key";
/// Environment variable read by [`EnvCredentialStore`].
pub const API_KEY_ENV: &str = "RAG_API_KEY";

/// Source of the API key.
pub trait CredentialStore: Send + Sync {
    /// Returns the key, or `None` when nothing usable is stored.
    fn api_key(&self) -> Option<String>;
}

fn usable(key: String) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// A fixed key, for embedding and tests.
#[derive(Clone, Debug)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl CredentialStore for StaticCredential {
    fn api_key(&self) -> Option<String> {
        self.0.clone().and_then(usable)
    }
}

/// Reads [`API_KEY_ENV`].
#[derive(Clone, Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV).ok().and_then(usable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("settings file {path} is not a JSON object: {message}")]
    Format { path: PathBuf, message: String },
}

/// JSON settings file holding the key under [`API_KEY_SETTING`].
///
/// Other entries in the file are preserved when the key is written.
#[derive(Clone, Debug)]
pub struct SettingsFileStore {
    path: PathBuf,
}

impl SettingsFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the key, creating the file and its parent directory if needed.
    pub fn store_api_key(&self, key: &str) -> Result<(), SettingsError> {
        let mut settings = match self.read_settings() {
            Ok(settings) => settings,
            Err(SettingsError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                serde_json::Map::new()
            }
            Err(err) => return Err(err),
        };
        settings.insert(
            API_KEY_SETTING.to_string(),
            serde_json::Value::String(key.trim().to_string()),
        );
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(&serde_json::Value::Object(settings)).map_err(
            |e| SettingsError::Format {
                path: self.path.clone(),
                message: e.to_string(),
            },
        )?;
        std::fs::write(&self.path, body).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn read_settings(&self) -> Result<serde_json::Map<String, serde_json::Value>, SettingsError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(SettingsError::Format {
                path: self.path.clone(),
                message: "top-level value is not an object".into(),
            }),
            Err(e) => Err(SettingsError::Format {
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl CredentialStore for SettingsFileStore {
    fn api_key(&self) -> Option<String> {
        match self.read_settings() {
            Ok(settings) => settings
                .get(API_KEY_SETTING)
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned)
                .and_then(usable),
            Err(SettingsError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                None
            }
            Err(err) => {
                warn!(event = "credentials.settings_unreadable", error = %err);
                None
            }
        }
    }
}
