//! Saga instance persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::payment_saga::SAGA_TYPE;
use crate::state::SagaState;

/// Durable store for saga instances.
///
/// Saves are guarded by optimistic concurrency: `save` succeeds only if the
/// stored version still equals `instance.version()`. A never-saved instance
/// is at `Version::initial()`.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Loads a saga by ID.
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>>;

    /// Persists `instance`, returning its new version.
    ///
    /// Fails with `ConcurrencyConflict` if another writer saved first.
    async fn save(&self, instance: &SagaInstance) -> Result<Version>;

    /// Returns every saga not yet in a terminal state.
    async fn list_active(&self) -> Result<Vec<SagaInstance>>;
}

/// Stored form of a saga instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaSnapshot {
    pub saga_id: SagaId,
    pub saga_type: String,
    pub version: Version,
    pub state: SagaState,
    pub saved_at: DateTime<Utc>,
    /// The serialized instance.
    pub data: serde_json::Value,
}

impl SagaSnapshot {
    /// Serializes `instance` as it will be stored at `version`.
    pub fn from_instance(instance: &SagaInstance, version: Version) -> Result<Self> {
        let mut stored = instance.clone();
        stored.set_version(version);
        Ok(Self {
            saga_id: instance.id(),
            saga_type: SAGA_TYPE.to_string(),
            version,
            state: instance.state(),
            saved_at: Utc::now(),
            data: serde_json::to_value(&stored)?,
        })
    }

    /// Deserializes the stored instance.
    pub fn to_instance(&self) -> Result<SagaInstance> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    snapshots: HashMap<SagaId, SagaSnapshot>,
    unavailable: bool,
    fail_on_save: bool,
    saves: usize,
}

/// In-memory saga repository.
///
/// Terminal sagas are kept so their final state stays queryable.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaRepository {
    state: Arc<RwLock<RepositoryState>>,
}

impl InMemorySagaRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating a storage outage.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Configures the repository to reject saves while loads keep working.
    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.write().await.fail_on_save = fail;
    }

    /// Returns the number of stored sagas, terminal ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.snapshots.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.snapshots.is_empty()
    }

    /// Returns how many saves succeeded.
    pub async fn save_count(&self) -> usize {
        self.state.read().await.saves
    }
}

fn unavailable() -> SagaError {
    SagaError::Repository("repository unavailable".to_string())
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(unavailable());
        }
        state
            .snapshots
            .get(&saga_id)
            .map(SagaSnapshot::to_instance)
            .transpose()
    }

    async fn save(&self, instance: &SagaInstance) -> Result<Version> {
        let mut state = self.state.write().await;
        if state.unavailable || state.fail_on_save {
            return Err(unavailable());
        }

        let saga_id = instance.id();
        let expected = instance.version();
        let actual = state
            .snapshots
            .get(&saga_id)
            .map(|s| s.version)
            .unwrap_or(Version::initial());
        if actual != expected {
            return Err(SagaError::ConcurrencyConflict {
                saga_id,
                expected,
                actual,
            });
        }

        let version = expected.next();
        let snapshot = SagaSnapshot::from_instance(instance, version)?;
        state.snapshots.insert(saga_id, snapshot);
        state.saves += 1;
        Ok(version)
    }

    async fn list_active(&self) -> Result<Vec<SagaInstance>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(unavailable());
        }
        state
            .snapshots
            .values()
            .filter(|s| !s.state.is_terminal())
            .map(SagaSnapshot::to_instance)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CorrelationKey;

    fn make_instance() -> SagaInstance {
        SagaInstance::new(SagaId::new(), CorrelationKey::new("pay-1"), Utc::now(), 8)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = InMemorySagaRepository::new();
        let saga = make_instance();

        let version = repo.save(&saga).await.unwrap();
        assert_eq!(version, Version::new(1));

        let loaded = repo.load(saga.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), saga.id());
        assert_eq!(loaded.version(), Version::new(1));
        assert_eq!(loaded.state(), SagaState::Started);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let repo = InMemorySagaRepository::new();
        assert!(repo.load(SagaId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let repo = InMemorySagaRepository::new();
        let saga = make_instance();
        repo.save(&saga).await.unwrap();

        // Saving the same never-saved copy again is a lost update.
        let err = repo.save(&saga).await.unwrap_err();
        match err {
            SagaError::ConcurrencyConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, Version::initial());
                assert_eq!(actual, Version::new(1));
            }
            other => panic!("unexpected error: {other}"),
        }

        let loaded = repo.load(saga.id()).await.unwrap().unwrap();
        assert_eq!(repo.save(&loaded).await.unwrap(), Version::new(2));
        assert_eq!(repo.save_count().await, 2);
    }

    #[tokio::test]
    async fn test_list_active_skips_terminal() {
        let repo = InMemorySagaRepository::new();
        let active = make_instance();
        repo.save(&active).await.unwrap();

        let mut done = make_instance();
        done.apply(
            &crate::machine::Transition {
                from: SagaState::Started,
                to: SagaState::Failed,
                context: Default::default(),
                command: None,
                reason: Some("deadline elapsed".to_string()),
                compensation_unresolved: false,
                context_conflicts: Vec::new(),
            },
            None,
            crate::machine::DEADLINE_ELAPSED,
            Utc::now(),
        );
        repo.save(&done).await.unwrap();

        let listed = repo.list_active().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), active.id());
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn test_unavailable_is_retryable() {
        let repo = InMemorySagaRepository::new();
        repo.set_unavailable(true).await;
        let err = repo.save(&make_instance()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
