//! Collaborators shared by the profile helpers.

use std::sync::Arc;

use profilekit_backend::{AuthProvider, Backend, BlobStore, RecordStore};

use crate::clock::{Clock, SystemClock};
use crate::config::ProfileSettings;

/// Everything a profile operation needs, passed explicitly.
///
/// Cloning is cheap; all collaborators are shared.
#[derive(Clone)]
pub struct ProfileContext {
    auth: Arc<dyn AuthProvider>,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    settings: ProfileSettings,
}

impl ProfileContext {
    /// Build a context over a resolved backend, using the wall clock.
    pub fn new(backend: Backend, settings: ProfileSettings) -> Self {
        Self::from_parts(backend.auth, backend.records, backend.blobs, settings)
    }

    /// Build a context from individual collaborators.
    pub fn from_parts(
        auth: Arc<dyn AuthProvider>,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        settings: ProfileSettings,
    ) -> Self {
        Self {
            auth,
            records,
            blobs,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn settings(&self) -> &ProfileSettings {
        &self.settings
    }
}

impl std::fmt::Debug for ProfileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileContext")
            .field("auth", &self.auth.name())
            .field("records", &self.records.name())
            .field("blobs", &self.blobs.name())
            .field("settings", &self.settings)
            .finish()
    }
}
