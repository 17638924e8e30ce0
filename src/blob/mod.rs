//! Content engine for Cairn.
//!
//! [`BlobStore`] keeps file bytes in an object store keyed by the resource
//! path with its leading `/` stripped. It issues presigned URLs for direct
//! upload and download and deletes objects, paging through prefix listings
//! when a whole directory goes.
//!
//! Object storage is abstracted by [`ObjectStore`]:
//! - [`LocalObjectStore`]: files under a base directory, URLs signed with HMAC
//! - [`MemoryObjectStore`]: in-process map with a configurable page size
//!
//! [`LocalCache`] keeps downloaded copies of file content on local disk.

mod cache;
mod content;
mod local;
mod memory;
mod signer;

pub use cache::{CacheToken, LocalCache};
pub use content::{content_disposition_inline, content_type_for};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use signer::{UrlSigner, VerifiedRequest};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use url::Url;

use crate::pool::{TaskHandle, TaskPool};
use crate::resource::{child_key_prefix, Resource};
use crate::{CairnError, Result};

/// Default number of keys requested per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Information about a stored object from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, when the backend tracks it.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page, ascending by key.
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page, `None` on the last page.
    pub continuation: Option<String>,
}

/// HTTP method a presigned URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// Download.
    Get,
    /// Upload.
    Put,
}

impl HttpMethod {
    /// Method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of a presigned URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    /// Allowed method.
    pub method: HttpMethod,
    /// Object key.
    pub key: String,
    /// How long the URL stays valid.
    pub expires_in: Duration,
    /// Content type override.
    pub content_type: Option<String>,
    /// Content disposition override.
    pub content_disposition: Option<String>,
}

impl PresignRequest {
    /// Create a request without overrides.
    pub fn new(method: HttpMethod, key: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            method,
            key: key.into(),
            expires_in,
            content_type: None,
            content_disposition: None,
        }
    }

    /// Set the content type override.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the content disposition override.
    pub fn with_content_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }
}

/// Operations required from the external object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, replacing any previous object.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read an object. A missing key is [`CairnError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Size of an object, or `None` if it doesn't exist.
    async fn head(&self, key: &str) -> Result<Option<u64>>;

    /// Delete an object, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List up to `max_keys` objects whose key starts with `prefix`,
    /// resuming after `continuation` when given.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage>;

    /// Issue a presigned URL.
    fn presign(&self, request: &PresignRequest) -> Result<Url>;
}

/// Object storage for resource content.
#[derive(Clone)]
pub struct BlobStore {
    objects: Arc<dyn ObjectStore>,
    url_validity: Duration,
    page_size: usize,
}

impl BlobStore {
    /// Create an engine issuing URLs valid for `url_validity`.
    pub fn new(objects: Arc<dyn ObjectStore>, url_validity: Duration) -> Self {
        Self {
            objects,
            url_validity,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of keys requested per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// How long issued URLs stay valid.
    pub fn url_validity(&self) -> Duration {
        self.url_validity
    }

    /// Presigned GET URL for a file, served inline under its own name.
    pub fn presigned_download_url_for_resource(&self, resource: &Resource) -> Result<Url> {
        self.presign_for(resource, HttpMethod::Get)
    }

    /// Presigned PUT URL for a file.
    pub fn presigned_upload_url_for_resource(&self, resource: &Resource) -> Result<Url> {
        self.presign_for(resource, HttpMethod::Put)
    }

    fn presign_for(&self, resource: &Resource, method: HttpMethod) -> Result<Url> {
        if !resource.is_file() {
            return Err(CairnError::InvalidArgument(format!(
                "directories have no content: {}",
                resource.path()
            )));
        }

        let request = PresignRequest::new(method, resource.object_key(), self.url_validity)
            .with_content_type(content_type_for(resource.name()))
            .with_content_disposition(content_disposition_inline(resource.name()));

        debug!("Presigning {} {}", method, resource.object_key());
        self.objects.presign(&request)
    }

    /// Delete a resource's content.
    ///
    /// A file deletes its own object. A directory deletes every object under
    /// its key prefix, following continuation tokens until the listing is
    /// exhausted. Missing objects are skipped.
    pub async fn delete_resource(&self, resource: &Resource) -> Result<()> {
        if resource.is_file() {
            let existed = self.objects.delete(resource.object_key()).await?;
            debug!("Deleted object {} (existed: {})", resource.object_key(), existed);
            return Ok(());
        }

        let prefix = child_key_prefix(resource.path());
        let mut continuation: Option<String> = None;
        let mut deleted = 0usize;

        loop {
            let page = self
                .objects
                .list_page(&prefix, continuation.as_deref(), self.page_size)
                .await?;

            for object in &page.objects {
                if self.objects.delete(&object.key).await? {
                    deleted += 1;
                }
            }

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        info!("Deleted {} object(s) under {}", deleted, resource.path());
        Ok(())
    }

    /// Run [`delete_resource`](Self::delete_resource) on the pool.
    pub fn delete_resource_async(
        &self,
        resource: Resource,
        pool: &TaskPool,
    ) -> Result<TaskHandle<()>> {
        let store = self.clone();
        let name = format!("delete-object {}", resource.path());
        pool.submit(name, async move { store.delete_resource(&resource).await })
    }

    /// Size of a file's object, or `None` if it is missing.
    pub async fn resource_object_size(&self, resource: &Resource) -> Result<Option<u64>> {
        self.objects.head(resource.object_key()).await
    }

    /// One listing page with the configured page size.
    pub async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        self.objects
            .list_page(prefix, continuation, self.page_size)
            .await
    }

    /// Store bytes for a file.
    pub async fn put_resource_content(&self, resource: &Resource, data: &[u8]) -> Result<()> {
        if !resource.is_file() {
            return Err(CairnError::InvalidArgument(format!(
                "directories have no content: {}",
                resource.path()
            )));
        }
        self.objects.put(resource.object_key(), data).await
    }

    /// Read the bytes of a file.
    pub async fn get_resource_content(&self, resource: &Resource) -> Result<Vec<u8>> {
        self.objects.get(resource.object_key()).await
    }

    /// Delete a single object by key, returning whether it existed.
    pub async fn delete_object(&self, key: &str) -> Result<bool> {
        self.objects.delete(key).await
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("url_validity", &self.url_validity)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
