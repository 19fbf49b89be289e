//! Collaborator traits for the hosted backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use profilekit_common::{Identity, ObjectPath, Result};

/// A table row as a JSON object.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Selects a single row by column equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordKey {
    pub column: String,
    pub value: String,
}

impl RecordKey {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` carries this key.
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(serde_json::Value::String(s)) => s == &self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

/// Options for a blob write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Replace an existing object at the same path.
    pub upsert: bool,
    /// Client-side cache lifetime hint, in seconds.
    pub cache_control_secs: u32,
    /// MIME type of the content.
    pub content_type: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            upsert: false,
            cache_control_secs: 3600,
            content_type: None,
        }
    }
}

/// Where the caller has to send the user to finish an OAuth sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInRedirect {
    /// OAuth provider name, e.g. "google".
    pub provider: String,
    /// Authorization URL to open in a browser.
    pub url: String,
}

/// Authentication collaborator.
///
/// Implementations own the session; callers only observe the identity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Get the provider name (e.g., "supabase", "memory").
    fn name(&self) -> &str;

    /// Current signed-in user, or `None` when there is no active session.
    ///
    /// # Errors
    /// - Service unreachable
    async fn current_user(&self) -> Result<Option<Identity>>;

    /// Start an OAuth sign-in with the named provider.
    ///
    /// # Postconditions
    /// - Returns the authorization URL; no session exists until
    ///   [`AuthProvider::complete_oauth_sign_in`] succeeds
    async fn sign_in_with_provider(&self, provider: &str) -> Result<SignInRedirect>;

    /// Finish an OAuth sign-in with the code from the redirect callback.
    async fn complete_oauth_sign_in(&self, code: &str) -> Result<Identity>;

    /// Send a one-time sign-in link (and code) to `email`.
    async fn sign_in_with_email_link(&self, email: &str) -> Result<()>;

    /// Exchange the emailed one-time code for a session.
    async fn verify_email_otp(&self, email: &str, token: &str) -> Result<Identity>;

    /// End the current session.
    ///
    /// # Postconditions
    /// - Local session is cleared even when the remote revocation fails
    async fn sign_out(&self) -> Result<()>;
}

/// Keyed table access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the store name.
    fn name(&self) -> &str;

    /// Look up at most one row matching `key`.
    ///
    /// # Errors
    /// - Store unavailable
    /// - Permission denied by the store's policies
    async fn find_one(&self, table: &str, key: &RecordKey) -> Result<Option<Row>>;

    /// Insert a row.
    ///
    /// # Errors
    /// - `ConflictOnInsert` when the store rejects a duplicate key
    /// - Store unavailable
    async fn insert(&self, table: &str, row: Row) -> Result<()>;
}

/// Object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name.
    fn name(&self) -> &str;

    /// Write `data` to `path` in `bucket`.
    ///
    /// # Errors
    /// - `ConflictOnInsert` when the object exists and `options.upsert` is false
    /// - Store unavailable
    async fn upload(
        &self,
        bucket: &str,
        path: &ObjectPath,
        data: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()>;

    /// Public URL for `path` in `bucket`. Reachability is not checked.
    async fn public_url(&self, bucket: &str, path: &ObjectPath) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_key_matches() {
        let key = RecordKey::new("id", "u1");
        let row: Row = json!({"id": "u1"}).as_object().cloned().unwrap();
        let other: Row = json!({"id": "u2"}).as_object().cloned().unwrap();
        let numeric: Row = json!({"id": 7}).as_object().cloned().unwrap();

        assert!(key.matches(&row));
        assert!(!key.matches(&other));
        assert!(RecordKey::new("id", "7").matches(&numeric));
        assert!(!key.matches(&Row::new()));
    }

    #[test]
    fn test_upload_options_default() {
        let options = UploadOptions::default();
        assert!(!options.upsert);
        assert_eq!(options.cache_control_secs, 3600);
    }
}
