use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::filters::PoolQuery;
pub use crate::models::DataVersion;
use crate::models::{CandidateProperty, Property, SubjectProperty};

/// Errors raised by a property store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Property store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid row for account {account}: {message}")]
    InvalidRow { account: String, message: String },
}

/// Storage collaborator for the comparables engine.
///
/// `query_pool` may return a superset of the predicate (e.g. a bounding
/// box instead of an exact radius); the engine re-checks every row.
pub trait PropertyStore: Send + Sync {
    fn fetch_subject(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<Option<SubjectProperty>, StoreError>> + Send;

    fn query_pool(
        &self,
        query: &PoolQuery,
    ) -> impl Future<Output = Result<Vec<CandidateProperty>, StoreError>> + Send;

    fn data_version(&self) -> impl Future<Output = Result<DataVersion, StoreError>> + Send;
}

/// In-process property store keyed by account.
///
/// Used for tests and benchmarks, and for small extracts loaded from JSON.
/// `set_offline(true)` makes every call fail as if the database were down.
#[derive(Debug, Default)]
pub struct MemoryStore {
    properties: RwLock<BTreeMap<String, Property>>,
    version: AtomicI64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_properties<I>(properties: I) -> Self
    where
        I: IntoIterator<Item = Property>,
    {
        let map = properties.into_iter().map(|p| (p.account.clone(), p)).collect();
        Self {
            properties: RwLock::new(map),
            version: AtomicI64::new(1),
            offline: AtomicBool::new(false),
        }
    }

    /// Load a JSON array of properties
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let properties: Vec<Property> = serde_json::from_str(raw)?;
        Ok(Self::from_properties(properties))
    }

    /// Insert or replace a property; bumps the data version
    pub async fn upsert(&self, property: Property) {
        self.properties.write().await.insert(property.account.clone(), property);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove a property; bumps the data version when something was removed
    pub async fn remove(&self, account: &str) -> Option<Property> {
        let removed = self.properties.write().await.remove(account);
        if removed.is_some() {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.properties.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.properties.read().await.is_empty()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

impl PropertyStore for MemoryStore {
    async fn fetch_subject(&self, account: &str) -> Result<Option<SubjectProperty>, StoreError> {
        self.ensure_online()?;
        Ok(self.properties.read().await.get(account.trim()).cloned())
    }

    async fn query_pool(&self, query: &PoolQuery) -> Result<Vec<CandidateProperty>, StoreError> {
        self.ensure_online()?;
        let properties = self.properties.read().await;
        Ok(query.filter(properties.values()))
    }

    async fn data_version(&self) -> Result<DataVersion, StoreError> {
        self.ensure_online()?;
        Ok(DataVersion(self.version.load(Ordering::SeqCst)))
    }
}
