//! Backend collaborators for ProfileKit.
//!
//! This module provides trait-based interfaces for the three services the
//! profile helpers depend on (auth, records, blobs), an in-memory backend,
//! a hosted REST backend and a registry for resolving backends by name.
//!
//! # Design Principles
//! - Provider isolation: No backend-specific logic in the profile flows
//! - Async operations: All I/O operations are async
//! - Unified error semantics: Consistent error types across backends

pub mod memory;
pub mod provider;
pub mod registry;
pub mod supabase;

pub use memory::{MemoryAuth, MemoryBlobStore, MemoryRecordStore, StoredObject};
pub use provider::{
    AuthProvider, BlobStore, RecordKey, RecordStore, Row, SignInRedirect, UploadOptions,
};
pub use registry::{create_default_registry, Backend, BackendFactory, BackendRegistry};
