//! Common types used throughout ProfileKit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// Opaque user identifier issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains a path separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "UserId cannot be empty".to_string(),
            ));
        }
        // The id is used as the first component of object paths.
        if id.contains('/') || id.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "UserId cannot contain separators".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier.
    pub id: UserId,
    /// Email address, when the provider exposes one.
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: UserId) -> Self {
        Self { id, email: None }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Kind of profile media being uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Avatar,
    Banner,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Avatar => "avatar",
            MediaKind::Banner => "banner",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "avatar" => Ok(MediaKind::Avatar),
            "banner" => Ok(MediaKind::Banner),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown media kind '{}', expected 'avatar' or 'banner'",
                other
            ))),
        }
    }
}

/// Key of an object inside a storage bucket.
///
/// Always relative: components are joined with '/' and never start with one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    components: Vec<String>,
}

impl ObjectPath {
    /// Create a path from string components.
    ///
    /// # Preconditions
    /// - At least one component
    /// - Components must not contain path separators
    /// - Components must not be empty, "." or ".."
    ///
    /// # Errors
    /// - Returns error if any component is invalid
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        if components.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Object path cannot be empty".to_string(),
            ));
        }
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a '/'-separated key such as `u1/avatar-1.png`.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        let components: Vec<String> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').map(String::from).collect()
        };
        Self::from_components(components)
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be a relative reference".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the object name (last component).
    pub fn name(&self) -> &str {
        // from_components guarantees at least one component
        self.components.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to the '/'-joined key.
    pub fn as_key(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

/// Check that an email address is plausibly deliverable.
///
/// # Errors
/// - Missing '@', empty local part or domain, or more than one '@'
pub fn validate_email(email: &str) -> crate::Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(crate::Error::InvalidInput(format!(
            "Invalid email address: '{}'",
            email
        ))),
    }
}

/// Per-user profile row. Only the key is written by this crate family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: UserId,
}

impl ProfileRecord {
    pub fn new(id: UserId) -> Self {
        Self { id }
    }
}

/// Secret string that zeroizes on drop and never prints its content.
#[derive(Clone, PartialEq, Eq, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} chars])", self.0.len())
    }
}
