//! REST client for the hosted database (PostgREST) and object storage APIs.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use url::Url;

use profilekit_common::{Error, ObjectPath, Result, SecretString};

use super::auth::SessionManager;
use crate::provider::{RecordKey, Row, UploadOptions};

/// Characters left as-is in object path segments.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Postgres error code for unique constraint violations.
const PG_UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn transport_error(context: &str, e: reqwest::Error) -> Error {
    Error::StoreUnavailable(format!("{}: {}", context, e))
}

/// Pull a human readable message out of an error body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// Whether an error body describes a duplicate key / existing object.
fn is_duplicate(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    let code = value.get("code").and_then(|v| v.as_str());
    // Storage reports duplicates as 400 with the HTTP status in the body.
    let status = value.get("statusCode").and_then(|v| v.as_str());
    let error = value.get("error").and_then(|v| v.as_str());
    code == Some(PG_UNIQUE_VIOLATION) || status == Some("409") || error == Some("Duplicate")
}

/// Map a non-success response to the crate error, passing successes through.
pub(crate) async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT || is_duplicate(&body) {
        return Err(Error::ConflictOnInsert(error_message(&body)));
    }

    let message = error_message(&body);
    Err(match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(message),
        StatusCode::FORBIDDEN => Error::PermissionDenied(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => Error::StoreUnavailable(format!("API error: {} - {}", status, message)),
    })
}

/// Client for table and object requests.
///
/// Requests carry the signed-in user's access token when there is a session
/// and fall back to the anonymous key otherwise.
pub struct SupabaseClient {
    http: Client,
    base: Url,
    anon_key: SecretString,
    sessions: Arc<SessionManager>,
}

impl SupabaseClient {
    /// Create a new client. `base` must end with '/'.
    pub fn new(http: Client, base: Url, anon_key: SecretString, sessions: Arc<SessionManager>) -> Self {
        Self {
            http,
            base,
            anon_key,
            sessions,
        }
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = match self.sessions.access_token().await? {
            Some(token) => token,
            None => self.anon_key.expose().to_string(),
        };
        Ok(format!("Bearer {}", token))
    }

    fn rest_url(&self, table: &str) -> Result<Url> {
        let table = utf8_percent_encode(table, PATH_SEGMENT).to_string();
        self.base
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| Error::Configuration(format!("Invalid table URL: {}", e)))
    }

    fn object_suffix(bucket: &str, path: &ObjectPath) -> String {
        let mut suffix = utf8_percent_encode(bucket, PATH_SEGMENT).to_string();
        for component in path.components() {
            suffix.push('/');
            suffix.extend(utf8_percent_encode(component, PATH_SEGMENT));
        }
        suffix
    }

    /// Select at most one row where `key.column` equals `key.value`.
    pub async fn select_one(&self, table: &str, key: &RecordKey) -> Result<Option<Row>> {
        let url = self.rest_url(table)?;
        let auth = self.auth_header().await?;
        let filter = format!("eq.{}", key.value);

        let response = self
            .http
            .get(url)
            .header("apikey", self.anon_key.expose())
            .header(header::AUTHORIZATION, auth)
            .query(&[
                ("select", "*"),
                (key.column.as_str(), filter.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| transport_error("Failed to query table", e))?;

        let rows: Vec<Row> = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse rows: {}", e)))?;

        Ok(rows.into_iter().next())
    }

    /// Insert a single row.
    pub async fn insert(&self, table: &str, row: &Row) -> Result<()> {
        let url = self.rest_url(table)?;
        let auth = self.auth_header().await?;

        let response = self
            .http
            .post(url)
            .header("apikey", self.anon_key.expose())
            .header(header::AUTHORIZATION, auth)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| transport_error("Failed to insert row", e))?;

        error_for_status(response).await?;
        Ok(())
    }

    /// Upload an object.
    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &ObjectPath,
        data: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()> {
        let url = self
            .base
            .join(&format!("storage/v1/object/{}", Self::object_suffix(bucket, path)))
            .map_err(|e| Error::Configuration(format!("Invalid object URL: {}", e)))?;
        let auth = self.auth_header().await?;
        let content_type = options
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let response = self
            .http
            .post(url)
            .header("apikey", self.anon_key.expose())
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, content_type)
            .header(
                header::CACHE_CONTROL,
                format!("max-age={}", options.cache_control_secs),
            )
            .header("x-upsert", options.upsert.to_string())
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("Failed to upload object", e))?;

        error_for_status(response).await?;
        Ok(())
    }

    /// Public URL of an object in a public bucket.
    pub fn public_object_url(&self, bucket: &str, path: &ObjectPath) -> String {
        format!(
            "{}storage/v1/object/public/{}",
            self.base,
            Self::object_suffix(bucket, path)
        )
    }
}
