//! Profile helpers for ProfileKit.
//!
//! Keeps a per-user profile row in sync with the auth session and stores
//! avatar and banner images. Every operation takes a [`ProfileContext`].

pub mod account;
pub mod clock;
pub mod config;
pub mod context;
pub mod media;
pub mod reconcile;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{BackendConfig, ProfileSettings};
pub use context::ProfileContext;
pub use media::{content_type_for, file_extension, media_object_path, upload_profile_image};
pub use reconcile::{ensure_profile_best_effort, ensure_profile_exists, ReconcileOutcome};
