//! Backend registry for dynamic backend resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use profilekit_common::{Error, Identity, Result, UserId};

use crate::memory::{MemoryAuth, MemoryBlobStore, MemoryRecordStore};
use crate::provider::{AuthProvider, BlobStore, RecordStore};

/// The collaborators one backend provides.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthProvider>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(Value) -> Result<Backend> + Send + Sync>;

/// Registry for backend factories.
///
/// Allows dynamic registration and resolution of backends
/// by name and configuration.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Configuration(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a backend by name and configuration.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Backend> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::Configuration(format!("Backend '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Get list of registered backend names.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory backend; `{"user": "<id>"}` starts it signed in.
fn create_memory_backend(config: Value) -> Result<Backend> {
    let auth = match config.get("user").and_then(|v| v.as_str()) {
        Some(id) => MemoryAuth::signed_in(Identity::new(UserId::new(id)?)),
        None => MemoryAuth::new(),
    };

    Ok(Backend {
        auth: Arc::new(auth),
        records: Arc::new(MemoryRecordStore::new()),
        blobs: Arc::new(MemoryBlobStore::new()),
    })
}

/// Create a registry with the built-in backends.
pub fn create_default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();

    // Built-in names are distinct, so insert directly.
    registry
        .factories
        .insert("memory".to_string(), Box::new(create_memory_backend));
    registry.factories.insert(
        "supabase".to_string(),
        Box::new(crate::supabase::create_supabase_backend),
    );

    registry
}
