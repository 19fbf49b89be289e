//! Hosted backend (Supabase-compatible REST APIs).
//!
//! This module provides:
//! - Auth API sessions with PKCE OAuth, email one-time codes and automatic refresh
//! - Row lookup and insert through the database REST API
//! - Object upload and public URL derivation for storage buckets

pub mod auth;
pub mod client;
pub mod provider;

pub use auth::{GoTrueApi, Session, SessionManager};
pub use client::SupabaseClient;
pub use provider::{
    SupabaseAuth, SupabaseBackend, SupabaseConfig, SupabaseRecords, SupabaseStorage,
};

use profilekit_common::{Error, Result};

use crate::registry::Backend;

/// Build the hosted backend from registry configuration.
pub fn create_supabase_backend(config: serde_json::Value) -> Result<Backend> {
    let config: SupabaseConfig = serde_json::from_value(config)
        .map_err(|e| Error::Configuration(format!("Invalid supabase configuration: {}", e)))?;
    let backend = SupabaseBackend::new(config)?;
    Ok(Backend {
        auth: backend.auth,
        records: backend.records,
        blobs: backend.storage,
    })
}
