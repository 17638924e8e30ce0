//! In-process object backend.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use url::Url;

use super::{ObjectInfo, ObjectPage, ObjectStore, PresignRequest, UrlSigner, DEFAULT_PAGE_SIZE};
use crate::{CairnError, Result};

struct StoredObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// Object store held in memory.
///
/// Listings never return more than the configured page size, whatever the
/// caller asks for, so pagination can be exercised with small data sets.
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
    signer: Option<UrlSigner>,
}

impl MemoryObjectStore {
    /// Create an empty store that cannot presign.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            signer: None,
        }
    }

    /// Cap listing pages at `page_size` keys.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sign presigned URLs with `signer`.
    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Every stored key, ascending.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| CairnError::NotFound(format!("object {key}")))
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        Ok(self
            .objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.len() as u64))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().await.remove(key).is_some())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage> {
        let limit = max_keys.min(self.page_size).max(1);
        let start = match continuation {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let objects = self.objects.read().await;
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .skip_while(|(key, _)| key.as_str() < prefix)
            .take_while(|(key, _)| key.starts_with(prefix));

        let page: Vec<ObjectInfo> = matching
            .by_ref()
            .take(limit)
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.modified),
            })
            .collect();

        let continuation = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        Ok(ObjectPage {
            objects: page,
            continuation,
        })
    }

    fn presign(&self, request: &PresignRequest) -> Result<Url> {
        match self.signer {
            Some(ref signer) => signer.sign(request),
            None => Err(CairnError::Storage(
                "presigning is not configured for this store".to_string(),
            )),
        }
    }
}
