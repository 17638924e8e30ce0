//! In-process metadata backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChildFilter, MetadataStore};
use crate::resource::Resource;
use crate::Result;

#[derive(Default)]
struct State {
    records: BTreeMap<String, Resource>,
    // parent path -> child paths
    children: HashMap<String, BTreeSet<String>>,
}

/// Metadata store held in memory.
///
/// Records live in an ordered map keyed by path, so prefix scans are range
/// reads. A child-adjacency index per parent answers listing queries
/// without touching unrelated records.
#[derive(Default)]
pub struct MemoryMetadataStore {
    state: RwLock<State>,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, path: &str) -> Result<Vec<Resource>> {
        let state = self.state.read().await;
        Ok(state.records.get(path).cloned().into_iter().collect())
    }

    async fn put(&self, resource: &Resource) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .children
            .entry(resource.parent().to_string())
            .or_default()
            .insert(resource.path().to_string());
        state
            .records
            .insert(resource.path().to_string(), resource.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(removed) = state.records.remove(path) else {
            return Ok(false);
        };

        let now_empty = match state.children.get_mut(removed.parent()) {
            Some(siblings) => {
                siblings.remove(path);
                siblings.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.children.remove(removed.parent());
        }
        Ok(true)
    }

    async fn query_by_parent(&self, parent: &str, filter: &ChildFilter) -> Result<Vec<Resource>> {
        let state = self.state.read().await;
        let Some(paths) = state.children.get(parent) else {
            return Ok(Vec::new());
        };

        Ok(paths
            .iter()
            .filter_map(|p| state.records.get(p))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Resource>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn scan_all(&self) -> Result<Vec<Resource>> {
        let state = self.state.read().await;
        Ok(state.records.values().cloned().collect())
    }
}
