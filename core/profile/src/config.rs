//! Profile helper configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use profilekit_backend::{create_default_registry, Backend};
use profilekit_common::{Error, Result, SecretString};

/// Default table holding one row per user.
pub const DEFAULT_PROFILES_TABLE: &str = "profiles";
/// Default bucket for avatars and banners.
pub const DEFAULT_MEDIA_BUCKET: &str = "profile-media";
/// Default client cache lifetime for uploaded media.
pub const DEFAULT_CACHE_CONTROL_SECS: u32 = 3600;

/// Where profile rows and media live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    #[serde(default = "default_profiles_table")]
    pub profiles_table: String,
    #[serde(default = "default_media_bucket")]
    pub media_bucket: String,
    #[serde(default = "default_cache_control_secs")]
    pub cache_control_secs: u32,
}

fn default_profiles_table() -> String {
    DEFAULT_PROFILES_TABLE.to_string()
}

fn default_media_bucket() -> String {
    DEFAULT_MEDIA_BUCKET.to_string()
}

fn default_cache_control_secs() -> u32 {
    DEFAULT_CACHE_CONTROL_SECS
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            profiles_table: default_profiles_table(),
            media_bucket: default_media_bucket(),
            cache_control_secs: default_cache_control_secs(),
        }
    }
}

fn default_provider() -> String {
    "supabase".to_string()
}

/// Backend selection plus profile settings.
///
/// Loaded from a JSON file or from `PROFILEKIT_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Registered backend name ("supabase" or "memory").
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<SecretString>,
    #[serde(default)]
    pub redirect_to: Option<String>,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    /// Pre-signed-in user for the memory backend.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(flatten)]
    pub settings: ProfileSettings,
}

impl BackendConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Configuration(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from a variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = ProfileSettings::default();
        if let Some(table) = lookup("PROFILEKIT_PROFILES_TABLE") {
            settings.profiles_table = table;
        }
        if let Some(bucket) = lookup("PROFILEKIT_MEDIA_BUCKET") {
            settings.media_bucket = bucket;
        }
        if let Some(secs) = lookup("PROFILEKIT_CACHE_CONTROL_SECS") {
            settings.cache_control_secs = secs.parse().map_err(|_| {
                Error::Configuration(format!("PROFILEKIT_CACHE_CONTROL_SECS is not a number: {}", secs))
            })?;
        }

        Ok(Self {
            provider: lookup("PROFILEKIT_PROVIDER").unwrap_or_else(default_provider),
            url: lookup("PROFILEKIT_URL"),
            anon_key: lookup("PROFILEKIT_ANON_KEY").map(SecretString::new),
            redirect_to: lookup("PROFILEKIT_REDIRECT_TO"),
            session_file: lookup("PROFILEKIT_SESSION_FILE").map(PathBuf::from),
            user: lookup("PROFILEKIT_USER"),
            settings,
        })
    }

    /// Provider-specific configuration handed to the backend registry.
    pub fn provider_config(&self) -> Result<serde_json::Value> {
        match self.provider.as_str() {
            "supabase" => {
                let url = self.url.as_ref().ok_or_else(|| {
                    Error::Configuration("supabase backend requires 'url'".to_string())
                })?;
                let anon_key = self.anon_key.as_ref().ok_or_else(|| {
                    Error::Configuration("supabase backend requires 'anon_key'".to_string())
                })?;
                Ok(serde_json::json!({
                    "url": url,
                    "anon_key": anon_key,
                    "redirect_to": self.redirect_to,
                    "session_file": self.session_file,
                }))
            }
            "memory" => Ok(serde_json::json!({ "user": self.user })),
            _ => Ok(serde_json::Value::Null),
        }
    }

    /// Resolve the configured backend.
    pub fn connect(&self) -> Result<Backend> {
        create_default_registry().resolve(&self.provider, self.provider_config()?)
    }
}
