//! In-memory backend for testing.
//!
//! All state lives in process memory and is lost on drop. Every store counts
//! the calls it receives and can be switched to an unavailable state so that
//! error paths can be exercised without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use profilekit_common::{validate_email, Error, Identity, ObjectPath, Result, UserId};

use crate::provider::{
    AuthProvider, BlobStore, RecordKey, RecordStore, Row, SignInRedirect, UploadOptions,
};

fn unavailable(store: &str) -> Error {
    Error::StoreUnavailable(format!("{} store is unavailable", store))
}

#[derive(Default)]
struct AuthState {
    current: Option<Identity>,
    /// Known accounts by email.
    accounts: HashMap<String, Identity>,
    /// Outstanding one-time codes by email.
    pending_otps: HashMap<String, String>,
    /// Outstanding OAuth codes and the provider they were issued for.
    pending_codes: HashMap<String, String>,
}

/// In-memory auth provider.
pub struct MemoryAuth {
    state: RwLock<AuthState>,
    calls: AtomicUsize,
}

impl MemoryAuth {
    /// Create a provider with no active session.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AuthState::default()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a provider with `identity` already signed in.
    pub fn signed_in(identity: Identity) -> Self {
        let mut state = AuthState::default();
        if let Some(email) = &identity.email {
            state.accounts.insert(email.clone(), identity.clone());
        }
        state.current = Some(identity);
        Self {
            state: RwLock::new(state),
            calls: AtomicUsize::new(0),
        }
    }

    /// The code most recently sent to `email`, as if read from the inbox.
    pub async fn last_otp(&self, email: &str) -> Option<String> {
        self.state.read().await.pending_otps.get(email).cloned()
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn track(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    fn name(&self) -> &str {
        "memory"
    }

    async fn current_user(&self) -> Result<Option<Identity>> {
        self.track();
        Ok(self.state.read().await.current.clone())
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<SignInRedirect> {
        self.track();
        if provider.is_empty() {
            return Err(Error::InvalidInput("Provider name cannot be empty".to_string()));
        }

        let code = Uuid::new_v4().simple().to_string();
        self.state
            .write()
            .await
            .pending_codes
            .insert(code.clone(), provider.to_string());

        Ok(SignInRedirect {
            provider: provider.to_string(),
            url: format!("memory://authorize?provider={}&code={}", provider, code),
        })
    }

    async fn complete_oauth_sign_in(&self, code: &str) -> Result<Identity> {
        self.track();
        let mut state = self.state.write().await;
        let provider = state
            .pending_codes
            .remove(code)
            .ok_or_else(|| Error::Authentication("Unknown or expired OAuth code".to_string()))?;

        let id = UserId::new(format!("{}-{}", provider, Uuid::new_v4().simple()))?;
        let identity = Identity::new(id);
        state.current = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_in_with_email_link(&self, email: &str) -> Result<()> {
        self.track();
        validate_email(email)?;
        let token = format!("{:06}", Uuid::new_v4().as_u128() % 1_000_000);
        self.state
            .write()
            .await
            .pending_otps
            .insert(email.to_string(), token);
        Ok(())
    }

    async fn verify_email_otp(&self, email: &str, token: &str) -> Result<Identity> {
        self.track();
        validate_email(email)?;
        let mut state = self.state.write().await;
        match state.pending_otps.get(email) {
            Some(expected) if expected == token => {}
            _ => {
                return Err(Error::Authentication(
                    "Token has expired or is invalid".to_string(),
                ))
            }
        }
        state.pending_otps.remove(email);

        let identity = match state.accounts.get(email) {
            Some(existing) => existing.clone(),
            None => {
                let created =
                    Identity::new(UserId::new(Uuid::new_v4().to_string())?).with_email(email);
                state.accounts.insert(email.to_string(), created.clone());
                created
            }
        };
        state.current = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.track();
        self.state.write().await.current = None;
        Ok(())
    }
}

/// In-memory record store.
///
/// Enforces uniqueness of the configured key column unless built with
/// [`MemoryRecordStore::without_unique_key`].
pub struct MemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    unique_column: Option<String>,
    unavailable: AtomicBool,
    find_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemoryRecordStore {
    /// Create an empty store with a unique `id` column.
    pub fn new() -> Self {
        Self::with_unique_column(Some("id".to_string()))
    }

    /// Create an empty store that accepts duplicate keys.
    pub fn without_unique_key() -> Self {
        Self::with_unique_column(None)
    }

    fn with_unique_column(unique_column: Option<String>) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            unique_column,
            unavailable: AtomicBool::new(false),
            find_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of rows in `table` matching `key`.
    pub async fn count(&self, table: &str, key: &RecordKey) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.iter().filter(|row| key.matches(row)).count())
            .unwrap_or(0)
    }

    /// Number of `find_one` calls received.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Number of `insert` calls received.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Total number of calls received.
    pub fn calls(&self) -> usize {
        self.find_calls() + self.insert_calls()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_one(&self, table: &str, key: &RecordKey) -> Result<Option<Row>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable("record"));
        }

        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| key.matches(row)))
            .cloned())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable("record"));
        }

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();

        if let Some(column) = &self.unique_column {
            let value = row.get(column).ok_or_else(|| {
                Error::InvalidInput(format!("Row is missing key column '{}'", column))
            })?;
            if rows.iter().any(|existing| existing.get(column) == Some(value)) {
                return Err(Error::ConflictOnInsert(format!(
                    "duplicate key value {}={} in '{}'",
                    column, value, table
                )));
            }
        }

        rows.push(row);
        Ok(())
    }
}

/// Object stored by [`MemoryBlobStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub options: UploadOptions,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    unavailable: AtomicBool,
    upload_calls: AtomicUsize,
    url_calls: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            upload_calls: AtomicUsize::new(0),
            url_calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fetch a stored object.
    pub async fn get(&self, bucket: &str, path: &ObjectPath) -> Option<StoredObject> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), path.as_key()))
            .cloned()
    }

    /// Number of objects in `bucket`.
    pub async fn len(&self, bucket: &str) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    /// Number of `upload` calls received.
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Total number of calls received.
    pub fn calls(&self) -> usize {
        self.upload_calls() + self.url_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &ObjectPath,
        data: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable("blob"));
        }

        let key = (bucket.to_string(), path.as_key());
        let mut objects = self.objects.write().await;
        if !options.upsert && objects.contains_key(&key) {
            return Err(Error::ConflictOnInsert(format!(
                "Object already exists: {}/{}",
                bucket, path
            )));
        }

        objects.insert(
            key,
            StoredObject {
                data,
                options: options.clone(),
            },
        );
        Ok(())
    }

    async fn public_url(&self, bucket: &str, path: &ObjectPath) -> Result<String> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable("blob"));
        }
        Ok(format!("memory://{}/{}", bucket, path))
    }
}
