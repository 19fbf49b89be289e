//! Session handling against the hosted auth API (GoTrue).

use chrono::{DateTime, Duration, Utc};
use oauth2::{PkceCodeChallenge, PkceCodeVerifier};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use url::Url;

use profilekit_common::{Error, Identity, Result, SecretString, UserId};

use super::client::{error_for_status, transport_error};

/// Sessions are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;
/// Lifetime assumed when the server omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// An authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: SecretString,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// User the session belongs to.
    #[serde(default)]
    pub user: Option<Identity>,
}

impl Session {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// User object as returned by the auth API.
#[derive(Debug, Deserialize)]
pub(crate) struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl UserResponse {
    fn into_identity(self) -> Result<Identity> {
        Ok(Identity {
            id: UserId::new(self.id)?,
            email: self.email.filter(|e| !e.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<UserResponse>,
}

impl TokenResponse {
    fn into_session(self) -> Result<Session> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0).ok_or_else(|| {
                Error::Serialization(format!("Invalid expires_at timestamp: {}", at))
            })?,
            (None, Some(secs)) => Utc::now() + Duration::seconds(secs),
            (None, None) => Utc::now() + Duration::seconds(DEFAULT_EXPIRES_IN_SECS),
        };

        let user = self.user.map(UserResponse::into_identity).transpose()?;

        Ok(Session {
            access_token: SecretString::new(self.access_token),
            refresh_token: SecretString::new(self.refresh_token),
            expires_at,
            user,
        })
    }
}

/// Thin client for the auth endpoints.
pub struct GoTrueApi {
    http: Client,
    base: Url,
    anon_key: SecretString,
}

impl GoTrueApi {
    /// Create an API client. `base` must end with '/'.
    pub fn new(http: Client, base: Url, anon_key: SecretString) -> Self {
        Self {
            http,
            base,
            anon_key,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("auth/v1/{}", path))
            .map_err(|e| Error::Configuration(format!("Invalid auth endpoint: {}", e)))
    }

    /// Build the authorize URL for an OAuth provider with a PKCE challenge.
    pub fn authorize_url(
        &self,
        provider: &str,
        redirect_to: Option<&str>,
        challenge: &PkceCodeChallenge,
    ) -> Result<String> {
        let mut url = self.endpoint("authorize")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("provider", provider);
            if let Some(redirect) = redirect_to {
                pairs.append_pair("redirect_to", redirect);
            }
            pairs.append_pair("code_challenge", challenge.as_str());
            pairs.append_pair("code_challenge_method", "s256");
        }
        Ok(url.to_string())
    }

    /// Fetch the user for an access token. A rejected token yields `None`.
    pub async fn get_user(&self, access_token: &str) -> Result<Option<Identity>> {
        let response = self
            .http
            .get(self.endpoint("user")?)
            .header("apikey", self.anon_key.expose())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| transport_error("Failed to get user", e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let user: UserResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse user: {}", e)))?;
        user.into_identity().map(Some)
    }

    /// Send a magic link / one-time code to `email`.
    pub async fn send_otp(&self, email: &str, redirect_to: Option<&str>) -> Result<()> {
        let mut request = self
            .http
            .post(self.endpoint("otp")?)
            .header("apikey", self.anon_key.expose())
            .json(&serde_json::json!({
                "email": email,
                "create_user": true,
            }));

        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Failed to send sign-in link", e))?;

        error_for_status(response).await?;
        Ok(())
    }

    /// Exchange an emailed one-time code for a session.
    pub async fn verify_otp(&self, email: &str, token: &str) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("verify")?)
            .header("apikey", self.anon_key.expose())
            .json(&serde_json::json!({
                "type": "email",
                "email": email,
                "token": token,
            }))
            .send()
            .await
            .map_err(|e| transport_error("Failed to verify code", e))?;

        self.parse_session(response).await
    }

    /// Exchange an OAuth authorization code for a session (PKCE flow).
    pub async fn exchange_code(&self, code: &str, verifier: &PkceCodeVerifier) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("token")?)
            .header("apikey", self.anon_key.expose())
            .query(&[("grant_type", "pkce")])
            .json(&serde_json::json!({
                "auth_code": code,
                "code_verifier": verifier.secret(),
            }))
            .send()
            .await
            .map_err(|e| transport_error("Token exchange failed", e))?;

        self.parse_session(response).await
    }

    /// Obtain a new session from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("token")?)
            .header("apikey", self.anon_key.expose())
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| transport_error("Token refresh failed", e))?;

        self.parse_session(response).await
    }

    /// Revoke the session behind `access_token`.
    ///
    /// A token the server no longer knows about counts as revoked.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("logout")?)
            .header("apikey", self.anon_key.expose())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| transport_error("Failed to sign out", e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(()),
            _ => error_for_status(response).await.map(|_| ()),
        }
    }

    async fn parse_session(&self, response: reqwest::Response) -> Result<Session> {
        // Bad credentials come back as 400 from the auth API.
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(super::client::error_message(&body)));
        }

        let token: TokenResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse session: {}", e)))?;
        token.into_session()
    }
}

/// State kept between calls (and optionally between processes).
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthState {
    #[serde(default)]
    session: Option<Session>,
    /// Verifier of an OAuth sign-in that has not been completed yet.
    #[serde(default)]
    pkce_verifier: Option<SecretString>,
}

/// Session manager that automatically refreshes expired sessions.
pub struct SessionManager {
    api: GoTrueApi,
    state: RwLock<AuthState>,
    persist_path: Option<PathBuf>,
}

impl SessionManager {
    /// Create a manager without a session.
    pub fn new(api: GoTrueApi) -> Self {
        Self {
            api,
            state: RwLock::new(AuthState::default()),
            persist_path: None,
        }
    }

    /// Create a manager backed by a JSON file.
    ///
    /// # Postconditions
    /// - A session stored in `path` by an earlier process is restored
    ///
    /// # Errors
    /// - File exists but cannot be read or parsed
    pub fn with_persistence(api: GoTrueApi, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Runs once, before any request is made.
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            AuthState::default()
        };

        Ok(Self {
            api,
            state: RwLock::new(state),
            persist_path: Some(path),
        })
    }

    pub fn api(&self) -> &GoTrueApi {
        &self.api
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Postconditions
    /// - `None` when there is no session or the refresh token was rejected
    ///   (the stale session is dropped in that case)
    ///
    /// # Errors
    /// - Service unreachable during refresh
    pub async fn access_token(&self) -> Result<Option<String>> {
        let state = self.state.read().await;
        match &state.session {
            None => return Ok(None),
            Some(session) if !session.is_expired() => {
                return Ok(Some(session.access_token.expose().to_string()))
            }
            Some(_) => {}
        }
        drop(state);

        let mut state = self.state.write().await;

        // Double-check after acquiring write lock
        let refresh_token = match &state.session {
            None => return Ok(None),
            Some(session) if !session.is_expired() => {
                return Ok(Some(session.access_token.expose().to_string()))
            }
            Some(session) => session.refresh_token.expose().to_string(),
        };

        tracing::info!("Refreshing expired session");

        match self.api.refresh(&refresh_token).await {
            Ok(mut refreshed) => {
                if refreshed.user.is_none() {
                    refreshed.user = state.session.as_ref().and_then(|s| s.user.clone());
                }
                let token = refreshed.access_token.expose().to_string();
                state.session = Some(refreshed);
                self.persist(&state).await?;
                Ok(Some(token))
            }
            Err(Error::Authentication(reason)) => {
                tracing::warn!(%reason, "Refresh token rejected, dropping session");
                state.session = None;
                self.persist(&state).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Get the current session.
    pub async fn session(&self) -> Option<Session> {
        self.state.read().await.session.clone()
    }

    /// Replace the current session.
    pub async fn set_session(&self, session: Option<Session>) -> Result<()> {
        let mut state = self.state.write().await;
        state.session = session;
        self.persist(&state).await
    }

    /// Remember the verifier of a started OAuth sign-in.
    pub async fn set_pkce_verifier(&self, verifier: &PkceCodeVerifier) -> Result<()> {
        let mut state = self.state.write().await;
        state.pkce_verifier = Some(SecretString::new(verifier.secret().clone()));
        self.persist(&state).await
    }

    /// Take the verifier of a started OAuth sign-in, if any.
    pub async fn take_pkce_verifier(&self) -> Result<Option<PkceCodeVerifier>> {
        let mut state = self.state.write().await;
        let verifier = state
            .pkce_verifier
            .take()
            .map(|v| PkceCodeVerifier::new(v.expose().to_string()));
        self.persist(&state).await?;
        Ok(verifier)
    }

    async fn persist(&self, state: &AuthState) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(state)?;

        // Tokens are written owner-only to a sibling file, then moved into place.
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        // A leftover file from an interrupted write may carry a wider mode.
        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> GoTrueApi {
        GoTrueApi::new(
            Client::new(),
            Url::parse("https://project.example.co/").unwrap(),
            SecretString::new("anon"),
        )
    }

    fn session(expires_at: DateTime<Utc>) -> Session {
        Session {
            access_token: SecretString::new("access"),
            refresh_token: SecretString::new("refresh"),
            expires_at,
            user: Some(Identity::new(UserId::new("u1").unwrap())),
        }
    }

    #[test]
    fn test_session_expiration() {
        assert!(session(Utc::now() - Duration::hours(1)).is_expired());
        assert!(!session(Utc::now() + Duration::hours(1)).is_expired());
    }

    #[test]
    fn test_session_near_expiration() {
        // Inside the refresh margin counts as expired
        assert!(session(Utc::now() + Duration::seconds(30)).is_expired());
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let debug = format!("{:?}", session(Utc::now()));
        assert!(!debug.contains("\"access\""));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_token_response_into_session() {
        let json = serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": { "id": "u1", "email": "a@example.com" }
        });
        let token: TokenResponse = serde_json::from_value(json).unwrap();
        let session = token.into_session().unwrap();

        assert_eq!(session.access_token.expose(), "a");
        assert!(!session.is_expired());
        let user = session.user.unwrap();
        assert_eq!(user.id.as_str(), "u1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_token_response_prefers_expires_at() {
        let json = serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 1_000,
        });
        let token: TokenResponse = serde_json::from_value(json).unwrap();
        let session = token.into_session().unwrap();
        assert_eq!(session.expires_at.timestamp(), 1_000);
    }

    #[test]
    fn test_authorize_url() {
        let (challenge, _verifier) = PkceCodeChallenge::new_random_sha256();
        let url = api()
            .authorize_url("google", Some("http://localhost:3000/cb"), &challenge)
            .unwrap();

        assert!(url.starts_with("https://project.example.co/auth/v1/authorize?"));
        assert!(url.contains("provider=google"));
        assert!(url.contains("redirect_to=http%3A%2F%2Flocalhost%3A3000%2Fcb"));
        assert!(url.contains(&format!("code_challenge={}", challenge.as_str())));
        assert!(url.contains("code_challenge_method=s256"));
    }

    #[tokio::test]
    async fn test_session_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let manager = SessionManager::with_persistence(api(), &path).unwrap();
        manager
            .set_session(Some(session(Utc::now() + Duration::hours(1))))
            .await
            .unwrap();
        assert!(path.exists());

        let restored = SessionManager::with_persistence(api(), &path).unwrap();
        let token = restored.access_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("access"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let manager = SessionManager::with_persistence(api(), &path).unwrap();
        manager
            .set_session(Some(session(Utc::now() + Duration::hours(1))))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert!(std::fs::read_to_string(&path).unwrap().contains("refresh"));
        assert!(!dir.path().join("session.json.tmp").exists());

        // Rewrites keep the mode and leave valid JSON behind.
        manager.set_session(None).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        let restored = SessionManager::with_persistence(api(), &path).unwrap();
        assert!(restored.session().await.is_none());
    }

    #[tokio::test]
    async fn test_pkce_verifier_is_single_use() {
        let manager = SessionManager::new(api());
        let (_challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        manager.set_pkce_verifier(&verifier).await.unwrap();
        let taken = manager.take_pkce_verifier().await.unwrap().unwrap();
        assert_eq!(taken.secret(), verifier.secret());
        assert!(manager.take_pkce_verifier().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_session_no_token() {
        let manager = SessionManager::new(api());
        assert!(manager.access_token().await.unwrap().is_none());
    }
}
