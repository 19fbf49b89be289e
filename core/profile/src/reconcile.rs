//! Lazy creation of the per-user profile row.

use serde::{Deserialize, Serialize};

use profilekit_backend::{RecordKey, Row};
use profilekit_common::{Error, ProfileRecord, Result};

use crate::context::ProfileContext;

/// Column the profile row is keyed by.
pub const PROFILE_KEY_COLUMN: &str = "id";

/// What a reconciliation found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nobody is signed in; the record store was not touched.
    NoSession,
    /// The row was already there.
    AlreadyExists,
    /// The row was inserted by this call.
    Created,
}

fn profile_row(record: &ProfileRecord) -> Result<Row> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(row) => Ok(row),
        other => Err(Error::Serialization(format!(
            "Profile record serialized to non-object: {}",
            other
        ))),
    }
}

/// Make sure the signed-in user has a profile row.
///
/// # Postconditions
/// - With a session, exactly one row keyed by the user id exists on success
/// - Without a session, returns `NoSession` and makes no record store calls
///
/// # Errors
/// - Lookup failures are returned unchanged
/// - Insert failures other than a duplicate key are returned; no retry
pub async fn ensure_profile_exists(ctx: &ProfileContext) -> Result<ReconcileOutcome> {
    let Some(identity) = ctx.auth().current_user().await? else {
        tracing::debug!("No active session, skipping profile check");
        return Ok(ReconcileOutcome::NoSession);
    };

    let table = &ctx.settings().profiles_table;
    let key = RecordKey::new(PROFILE_KEY_COLUMN, identity.id.as_str());

    if ctx.records().find_one(table, &key).await?.is_some() {
        tracing::debug!(user = %identity.id, "Profile already exists");
        return Ok(ReconcileOutcome::AlreadyExists);
    }

    let row = profile_row(&ProfileRecord::new(identity.id.clone()))?;
    match ctx.records().insert(table, row).await {
        Ok(()) => {
            tracing::info!(user = %identity.id, table = %table, "Created profile");
            Ok(ReconcileOutcome::Created)
        }
        // A concurrent call inserted the same key first.
        Err(Error::ConflictOnInsert(reason)) => {
            tracing::debug!(user = %identity.id, %reason, "Profile created concurrently");
            Ok(ReconcileOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

/// Run [`ensure_profile_exists`] and log instead of returning failures.
pub async fn ensure_profile_best_effort(ctx: &ProfileContext) {
    if let Err(e) = ensure_profile_exists(ctx).await {
        if e.is_remote() {
            tracing::warn!(error = %e, "Profile check failed, will retry on next sign-in");
        } else {
            tracing::warn!(error = %e, "Profile check failed");
        }
    }
}
