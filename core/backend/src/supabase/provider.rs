//! Hosted backend implementation of the collaborator traits.

use async_trait::async_trait;
use oauth2::PkceCodeChallenge;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use profilekit_common::{validate_email, Error, Identity, ObjectPath, Result, SecretString};

use crate::provider::{
    AuthProvider, BlobStore, RecordKey, RecordStore, Row, SignInRedirect, UploadOptions,
};

use super::auth::{GoTrueApi, Session, SessionManager};
use super::client::SupabaseClient;

/// Hosted backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public (anon) API key.
    pub anon_key: SecretString,
    /// Where OAuth and email links send the user back to.
    #[serde(default)]
    pub redirect_to: Option<String>,
    /// File to keep the session in between processes.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

impl SupabaseConfig {
    /// Parse the project URL, normalized to end with '/'.
    pub fn base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::Configuration(format!("Invalid project URL '{}': {}", self.url, e)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// Auth provider backed by the hosted auth API.
pub struct SupabaseAuth {
    sessions: Arc<SessionManager>,
    redirect_to: Option<String>,
}

impl SupabaseAuth {
    pub fn new(sessions: Arc<SessionManager>, redirect_to: Option<String>) -> Self {
        Self {
            sessions,
            redirect_to,
        }
    }

    async fn establish(&self, session: Session) -> Result<Identity> {
        let identity = match &session.user {
            Some(user) => user.clone(),
            None => self
                .sessions
                .api()
                .get_user(session.access_token.expose())
                .await?
                .ok_or_else(|| Error::Authentication("New session was rejected".to_string()))?,
        };

        let mut session = session;
        session.user = Some(identity.clone());
        self.sessions.set_session(Some(session)).await?;

        tracing::info!(user = %identity.id, "Signed in");
        Ok(identity)
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn current_user(&self) -> Result<Option<Identity>> {
        let Some(token) = self.sessions.access_token().await? else {
            return Ok(None);
        };
        tracing::debug!("Fetching current user");
        self.sessions.api().get_user(&token).await
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<SignInRedirect> {
        if provider.is_empty() {
            return Err(Error::InvalidInput("Provider name cannot be empty".to_string()));
        }

        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let url = self
            .sessions
            .api()
            .authorize_url(provider, self.redirect_to.as_deref(), &challenge)?;
        self.sessions.set_pkce_verifier(&verifier).await?;

        tracing::debug!(provider, "Started OAuth sign-in");
        Ok(SignInRedirect {
            provider: provider.to_string(),
            url,
        })
    }

    async fn complete_oauth_sign_in(&self, code: &str) -> Result<Identity> {
        let verifier = self.sessions.take_pkce_verifier().await?.ok_or_else(|| {
            Error::Authentication("No OAuth sign-in in progress".to_string())
        })?;
        let session = self.sessions.api().exchange_code(code, &verifier).await?;
        self.establish(session).await
    }

    async fn sign_in_with_email_link(&self, email: &str) -> Result<()> {
        validate_email(email)?;
        self.sessions
            .api()
            .send_otp(email, self.redirect_to.as_deref())
            .await?;
        tracing::debug!("Sign-in link sent");
        Ok(())
    }

    async fn verify_email_otp(&self, email: &str, token: &str) -> Result<Identity> {
        validate_email(email)?;
        let session = self.sessions.api().verify_otp(email, token).await?;
        self.establish(session).await
    }

    async fn sign_out(&self) -> Result<()> {
        let session = self.sessions.session().await;

        // Always drop the local session, even if revocation fails.
        self.sessions.set_session(None).await?;

        if let Some(session) = session {
            self.sessions
                .api()
                .logout(session.access_token.expose())
                .await?;
        }
        tracing::info!("Signed out");
        Ok(())
    }
}

/// Record store backed by the hosted database.
pub struct SupabaseRecords {
    client: Arc<SupabaseClient>,
}

impl SupabaseRecords {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordStore for SupabaseRecords {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn find_one(&self, table: &str, key: &RecordKey) -> Result<Option<Row>> {
        tracing::debug!(table, %key, "Selecting row");
        self.client.select_one(table, key).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<()> {
        tracing::debug!(table, "Inserting row");
        self.client.insert(table, &row).await
    }
}

/// Blob store backed by the hosted object storage.
pub struct SupabaseStorage {
    client: Arc<SupabaseClient>,
}

impl SupabaseStorage {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &ObjectPath,
        data: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()> {
        tracing::debug!(bucket, %path, size = data.len(), upsert = options.upsert, "Uploading object");
        self.client.upload_object(bucket, path, data, options).await
    }

    async fn public_url(&self, bucket: &str, path: &ObjectPath) -> Result<String> {
        Ok(self.client.public_object_url(bucket, path))
    }
}

/// The three hosted collaborators sharing one session.
pub struct SupabaseBackend {
    pub auth: Arc<SupabaseAuth>,
    pub records: Arc<SupabaseRecords>,
    pub storage: Arc<SupabaseStorage>,
}

impl SupabaseBackend {
    /// Create the hosted backend.
    ///
    /// # Errors
    /// - Invalid project URL or empty key
    /// - Session file exists but is unreadable
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        if config.anon_key.is_empty() {
            return Err(Error::Configuration("anon_key cannot be empty".to_string()));
        }
        let base = config.base_url()?;

        let http = Client::builder()
            .user_agent(concat!("ProfileKit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let api = GoTrueApi::new(http.clone(), base.clone(), config.anon_key.clone());
        let sessions = Arc::new(match &config.session_file {
            Some(path) => SessionManager::with_persistence(api, path)?,
            None => SessionManager::new(api),
        });

        let client = Arc::new(SupabaseClient::new(
            http,
            base,
            config.anon_key.clone(),
            sessions.clone(),
        ));

        Ok(Self {
            auth: Arc::new(SupabaseAuth::new(sessions, config.redirect_to)),
            records: Arc::new(SupabaseRecords::new(client.clone())),
            storage: Arc::new(SupabaseStorage::new(client)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SupabaseConfig {
        SupabaseConfig {
            url: url.to_string(),
            anon_key: SecretString::new("anon"),
            redirect_to: None,
            session_file: None,
        }
    }

    #[test]
    fn test_base_url_normalized() {
        assert_eq!(
            config("https://p.example.co").base_url().unwrap().as_str(),
            "https://p.example.co/"
        );
        assert_eq!(
            config("http://localhost:54321/proxy").base_url().unwrap().as_str(),
            "http://localhost:54321/proxy/"
        );
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            config("not a url").base_url(),
            Err(Error::Configuration(_))
        ));

        let mut empty_key = config("https://p.example.co");
        empty_key.anon_key = SecretString::new("");
        assert!(SupabaseBackend::new(empty_key).is_err());
    }

    #[test]
    fn test_config_deserialization_defaults() {
        let config: SupabaseConfig =
            serde_json::from_value(serde_json::json!({"url": "https://p.example.co", "anon_key": "k"}))
                .unwrap();
        assert!(config.redirect_to.is_none());
        assert!(config.session_file.is_none());
        assert_eq!(config.anon_key.expose(), "k");
    }
}
