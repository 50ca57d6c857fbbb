//! Durable storage for workflow state and progress projections.
//!
//! The store is a string keyspace with per-record TTL. Backends implement
//! [`StateStore`]; everything above it goes through [`WorkflowStore`], which
//! owns the key layout and the serde boundary so engines never touch raw keys
//! or JSON.
//!
//! ## Key layout
//!
//! | Record                | Key                              |
//! |-----------------------|----------------------------------|
//! | generation state      | `state:{request_id}`             |
//! | generation progress   | `progress:{request_id}`          |
//! | deletion state        | `deletion:state:{request_id}`    |
//! | deletion progress     | `deletion:progress:{request_id}` |
//!
//! Records expire 24 hours after their last write unless configured
//! otherwise; an expired entry reads back as absent.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStateStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStateStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::state::{DeletionState, ProgressProjection, WorkflowState};

/// Default record lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The four record kinds the orchestrator persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    GenerationState,
    GenerationProgress,
    DeletionState,
    DeletionProgress,
}

impl RecordKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::GenerationState => "state",
            Self::GenerationProgress => "progress",
            Self::DeletionState => "deletion:state",
            Self::DeletionProgress => "deletion:progress",
        }
    }
}

/// A fully-qualified store key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub kind: RecordKind,
    pub request_id: String,
}

impl StoreKey {
    pub fn new(kind: RecordKind, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: request_id.into(),
        }
    }

    /// Render into the stable string form used by every backend.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{}:{}", self.kind.prefix(), self.request_id)
    }
}

/// Storage failures.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    #[diagnostic(
        code(questloom::store::backend),
        help("Check the store connection and that migrations have been applied.")
    )]
    Backend { message: String },

    #[error("stored record failed to (de)serialize: {0}")]
    #[diagnostic(
        code(questloom::store::serde),
        help("A record written by an incompatible version may need manual cleanup.")
    )]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Raw keyed string storage with TTL. Implement this to add a backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write `value` under `key`, replacing any prior value and resetting the
    /// record's expiry to `now + ttl`.
    async fn put(&self, key: &StoreKey, value: String, ttl: Duration) -> Result<()>;

    /// Read the value under `key`; `None` if absent or expired.
    async fn get(&self, key: &StoreKey) -> Result<Option<String>>;

    /// Remove the value under `key`; removing an absent key is not an error.
    async fn delete(&self, key: &StoreKey) -> Result<()>;
}

/// Typed facade over a [`StateStore`].
///
/// All serde happens here; engines load and save typed records and never see
/// keys or JSON strings.
#[derive(Clone)]
pub struct WorkflowStore {
    inner: Arc<dyn StateStore>,
    ttl: Duration,
}

impl WorkflowStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    async fn put_json<T: serde::Serialize>(&self, key: StoreKey, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.inner.put(&key, json, self.ttl).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>> {
        match self.inner.get(&key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save_generation(&self, state: &WorkflowState) -> Result<()> {
        self.put_json(
            StoreKey::new(RecordKind::GenerationState, &state.request_id),
            state,
        )
        .await
    }

    pub async fn load_generation(&self, request_id: &str) -> Result<Option<WorkflowState>> {
        self.get_json(StoreKey::new(RecordKind::GenerationState, request_id))
            .await
    }

    pub async fn save_deletion(&self, state: &DeletionState) -> Result<()> {
        self.put_json(
            StoreKey::new(RecordKind::DeletionState, &state.request_id),
            state,
        )
        .await
    }

    pub async fn load_deletion(&self, request_id: &str) -> Result<Option<DeletionState>> {
        self.get_json(StoreKey::new(RecordKind::DeletionState, request_id))
            .await
    }

    pub async fn save_generation_progress(&self, projection: &ProgressProjection) -> Result<()> {
        self.put_json(
            StoreKey::new(RecordKind::GenerationProgress, &projection.request_id),
            projection,
        )
        .await
    }

    pub async fn save_deletion_progress(&self, projection: &ProgressProjection) -> Result<()> {
        self.put_json(
            StoreKey::new(RecordKind::DeletionProgress, &projection.request_id),
            projection,
        )
        .await
    }

    pub async fn load_generation_progress(
        &self,
        request_id: &str,
    ) -> Result<Option<ProgressProjection>> {
        self.get_json(StoreKey::new(RecordKind::GenerationProgress, request_id))
            .await
    }

    pub async fn load_deletion_progress(
        &self,
        request_id: &str,
    ) -> Result<Option<ProgressProjection>> {
        self.get_json(StoreKey::new(RecordKind::DeletionProgress, request_id))
            .await
    }

    /// Load whichever progress projection exists for `request_id`, generation
    /// first. The router's idempotency guard reads through this.
    pub async fn load_any_progress(
        &self,
        request_id: &str,
    ) -> Result<Option<ProgressProjection>> {
        if let Some(p) = self.load_generation_progress(request_id).await? {
            return Ok(Some(p));
        }
        self.load_deletion_progress(request_id).await
    }

    /// Persist generation state and its fresh projection in one call.
    ///
    /// State is written before the projection: if the second write fails the
    /// projection is merely stale, never ahead of state.
    pub async fn checkpoint_generation(
        &self,
        state: &WorkflowState,
    ) -> Result<ProgressProjection> {
        self.save_generation(state).await?;
        let projection = ProgressProjection::from_generation(state);
        self.save_generation_progress(&projection).await?;
        Ok(projection)
    }

    /// Persist deletion state and its fresh projection in one call.
    pub async fn checkpoint_deletion(&self, state: &DeletionState) -> Result<ProgressProjection> {
        self.save_deletion(state).await?;
        let projection = ProgressProjection::from_deletion(state);
        self.save_deletion_progress(&projection).await?;
        Ok(projection)
    }
}

impl std::fmt::Debug for WorkflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStore").field("ttl", &self.ttl).finish()
    }
}
