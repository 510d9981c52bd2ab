//! Correlation key to saga ID mapping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CorrelationKey, SagaId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Maps correlation keys to saga IDs.
///
/// The mapping is created once by the start event and never changes, so two
/// concurrent start events for the same key always agree on one saga.
#[async_trait]
pub trait CorrelationIndex: Send + Sync {
    /// Returns the saga bound to `key`, if any.
    async fn resolve(&self, key: &CorrelationKey) -> Result<Option<SagaId>>;

    /// Binds `key` to `candidate` unless it is already bound.
    ///
    /// Returns the saga ID that ends up bound to the key and whether this call
    /// created the binding.
    async fn create_if_absent(
        &self,
        key: &CorrelationKey,
        candidate: SagaId,
    ) -> Result<(SagaId, bool)>;
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<CorrelationKey, SagaId>,
    unavailable: bool,
}

/// In-memory correlation index.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorrelationIndex {
    state: Arc<RwLock<IndexState>>,
}

impl InMemoryCorrelationIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating an outage.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns the number of bound keys.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Returns true if no key is bound.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

fn unavailable() -> SagaError {
    SagaError::CorrelationIndex("index unavailable".to_string())
}

#[async_trait]
impl CorrelationIndex for InMemoryCorrelationIndex {
    async fn resolve(&self, key: &CorrelationKey) -> Result<Option<SagaId>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(state.entries.get(key).copied())
    }

    async fn create_if_absent(
        &self,
        key: &CorrelationKey,
        candidate: SagaId,
    ) -> Result<(SagaId, bool)> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(unavailable());
        }
        if let Some(existing) = state.entries.get(key) {
            return Ok((*existing, false));
        }
        state.entries.insert(key.clone(), candidate);
        Ok((candidate, true))
    }
}
