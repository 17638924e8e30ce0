//! Local download cache.
//!
//! Resource content can be copied from the object store onto local disk and
//! served from there. Each cached file is named by the SHA-256 of the
//! resource path, so renames never collide with stale entries:
//! ```text
//! {directory}/
//! ├── 3f1c...e2a9
//! └── 9b07...41d0
//! ```
//!
//! Cached files are handed out through short-lived signed tokens of the
//! form `{payload}.{signature}`, where the payload is the base64url of
//! `{expiry}\n{path}`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use url::Url;

use super::signer::{sign_payload, verify_payload};
use super::BlobStore;
use crate::config::CacheConfig;
use crate::pool::{TaskHandle, TaskPool};
use crate::resource::Resource;
use crate::{CairnError, Result};

/// Path segment cache download URLs are issued under.
const CACHE_ROUTE: [&str; 2] = ["static", "cache"];

/// What a cache token grants access to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheToken {
    /// Resource path the token was issued for.
    pub path: String,
    /// Expiry instant, to the second.
    pub expires_at: DateTime<Utc>,
}

/// On-disk cache of resource content.
#[derive(Clone)]
pub struct LocalCache {
    directory: PathBuf,
    key: Vec<u8>,
    base_url: Url,
    token_validity: Duration,
    blobs: BlobStore,
}

impl LocalCache {
    /// Create a cache in `directory`, filling it from `blobs`.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new(
        directory: impl Into<PathBuf>,
        key: impl AsRef<[u8]>,
        base_url: Url,
        token_validity: Duration,
        blobs: BlobStore,
    ) -> Result<Self> {
        if key.as_ref().is_empty() {
            return Err(CairnError::Config("signing key cannot be empty".to_string()));
        }
        if base_url.cannot_be_a_base() {
            return Err(CairnError::Config(format!(
                "cache base URL cannot carry paths: {base_url}"
            )));
        }

        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;

        Ok(Self {
            directory,
            key: key.as_ref().to_vec(),
            base_url,
            token_validity,
            blobs,
        })
    }

    /// Create a cache from configuration, signing tokens with `key`.
    pub fn from_config(config: &CacheConfig, key: impl AsRef<[u8]>, blobs: BlobStore) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| CairnError::Config(format!("invalid cache base_url: {e}")))?;
        Self::new(&config.directory, key, base_url, config.token_validity(), blobs)
    }

    /// Directory holding cached files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Where the cached copy of `path` lives, whether or not it exists.
    pub fn cache_path(&self, path: &str) -> PathBuf {
        self.directory
            .join(format!("{:x}", Sha256::digest(path.as_bytes())))
    }

    /// The cached file for a resource path, if one exists.
    pub async fn cached_file_for_path(&self, path: &str) -> Result<Option<PathBuf>> {
        let file = self.cache_path(path);
        if tokio::fs::try_exists(&file).await? {
            Ok(Some(file))
        } else {
            debug!("{} is not cached", path);
            Ok(None)
        }
    }

    /// A signed download URL for the cached copy of a resource.
    ///
    /// `None` when the resource is not cached.
    pub async fn cached_download_url_for_resource(&self, resource: &Resource) -> Result<Option<Url>> {
        self.cached_download_url_at(resource, Utc::now()).await
    }

    /// Like [`cached_download_url_for_resource`](Self::cached_download_url_for_resource),
    /// with the expiry counted from `now`.
    pub async fn cached_download_url_at(
        &self,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> Result<Option<Url>> {
        if self.cached_file_for_path(resource.path()).await?.is_none() {
            return Ok(None);
        }

        let validity = chrono::Duration::from_std(self.token_validity)
            .map_err(|e| CairnError::InvalidArgument(format!("invalid token validity: {e}")))?;
        let token = self.sign_token(&CacheToken {
            path: resource.path().to_string(),
            expires_at: now + validity,
        })?;

        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                CairnError::Config(format!("cache base URL cannot carry paths: {}", self.base_url))
            })?;
            segments.pop_if_empty();
            segments.extend(CACHE_ROUTE);
            segments.push(&token);
            segments.push(resource.name());
        }
        Ok(Some(url))
    }

    /// Encode and sign a token.
    pub fn sign_token(&self, token: &CacheToken) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(format!(
            "{}\n{}",
            token.expires_at.timestamp(),
            token.path
        ));
        let signature = sign_payload(&self.key, payload.as_bytes())?;
        Ok(format!("{payload}.{signature}"))
    }

    /// Check a token's signature and expiry against the current time.
    pub fn verify_token(&self, token: &str) -> Result<CacheToken> {
        self.verify_token_at(token, Utc::now())
    }

    /// Check a token's signature and expiry as of `now`.
    pub fn verify_token_at(&self, token: &str, now: DateTime<Utc>) -> Result<CacheToken> {
        let malformed = || CairnError::Signature("malformed cache token".to_string());

        let (payload, signature) = token.split_once('.').ok_or_else(malformed)?;
        verify_payload(&self.key, payload.as_bytes(), signature)?;

        let decoded = URL_SAFE_NO_PAD
            .decode(payload.as_bytes())
            .map_err(|_| malformed())?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
        let (expires, path) = decoded.split_once('\n').ok_or_else(malformed)?;
        let expires: i64 = expires.parse().map_err(|_| malformed())?;
        let expires_at = DateTime::from_timestamp(expires, 0).ok_or_else(malformed)?;

        if now.timestamp() > expires {
            return Err(CairnError::Signature(format!(
                "cache token expired at {expires_at}"
            )));
        }

        Ok(CacheToken {
            path: path.to_string(),
            expires_at,
        })
    }

    /// Resolve a token from a cache download URL to the file it grants.
    ///
    /// Fails with [`CairnError::Signature`] for a bad or expired token and
    /// [`CairnError::NotFound`] once the cached copy is gone.
    pub async fn open_token(&self, token: &str) -> Result<(CacheToken, PathBuf)> {
        let token = match self.verify_token(token) {
            Ok(token) => token,
            Err(e) => {
                warn!("Rejected cache token: {}", e);
                return Err(e);
            }
        };
        match self.cached_file_for_path(&token.path).await? {
            Some(file) => Ok((token, file)),
            None => Err(CairnError::NotFound(format!("cached copy of {}", token.path))),
        }
    }

    /// Copy a file's content from the object store into the cache.
    ///
    /// The content lands under a temporary name and is renamed into place,
    /// so a failed download never leaves a partial cache entry.
    pub async fn download_resource_to_cache(&self, resource: &Resource) -> Result<PathBuf> {
        if !resource.is_file() {
            return Err(CairnError::InvalidArgument(format!(
                "directories cannot be cached: {}",
                resource.path()
            )));
        }

        let target = self.cache_path(resource.path());
        let partial = target.with_extension("part");
        let result = async {
            let content = self.blobs.get_resource_content(resource).await?;
            tokio::fs::write(&partial, &content).await?;
            tokio::fs::rename(&partial, &target).await?;
            Ok::<_, CairnError>(content.len())
        }
        .await;

        match result {
            Ok(bytes) => {
                info!("Cached {} ({} bytes)", resource.path(), bytes);
                Ok(target)
            }
            Err(e) => {
                error!("Failed to cache {}: {}", resource.path(), e);
                if let Err(cleanup) = remove_if_exists(&partial).await {
                    warn!("Failed to remove partial cache file {}: {}", partial.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    /// Run [`download_resource_to_cache`](Self::download_resource_to_cache) on the pool.
    pub fn download_resource_to_cache_async(
        &self,
        resource: Resource,
        pool: &TaskPool,
    ) -> Result<TaskHandle<PathBuf>> {
        let cache = self.clone();
        let name = format!("cache {}", resource.path());
        pool.submit(name, async move { cache.download_resource_to_cache(&resource).await })
    }

    /// Drop the cached copy of a resource path, returning whether one existed.
    pub async fn delete_path_from_cache(&self, path: &str) -> Result<bool> {
        let file = self.cache_path(path);
        match remove_if_exists(&file).await {
            Ok(true) => {
                info!("Removed {} from cache", path);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                warn!("Failed to remove {} from cache: {}", path, e);
                Err(e.into())
            }
        }
    }

    /// Drop the cached copy of a resource, returning whether one existed.
    pub async fn delete_resource_from_cache(&self, resource: &Resource) -> Result<bool> {
        self.delete_path_from_cache(resource.path()).await
    }

    /// Run [`delete_resource_from_cache`](Self::delete_resource_from_cache) on the pool.
    pub fn delete_resource_from_cache_async(
        &self,
        resource: Resource,
        pool: &TaskPool,
    ) -> Result<TaskHandle<bool>> {
        let cache = self.clone();
        let name = format!("uncache {}", resource.path());
        pool.submit(name, async move { cache.delete_resource_from_cache(&resource).await })
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("directory", &self.directory)
            .field("base_url", &self.base_url.as_str())
            .field("token_validity", &self.token_validity)
            .finish_non_exhaustive()
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{MemoryObjectStore, ObjectStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_cache() -> (TempDir, Arc<MemoryObjectStore>, LocalCache) {
        let temp_dir = TempDir::new().unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        let blobs = BlobStore::new(objects.clone(), Duration::from_secs(60));
        let cache = LocalCache::new(
            temp_dir.path().join("cache"),
            b"cache-key",
            Url::parse("https://files.test/").unwrap(),
            Duration::from_secs(300),
            blobs,
        )
        .unwrap();
        (temp_dir, objects, cache)
    }

    fn file(path: &str) -> Resource {
        Resource::new_file(path, "alice", 4).unwrap()
    }

    #[test]
    fn test_cache_path_is_sha256_of_path() {
        let (_temp, _objects, cache) = create_test_cache();
        let path = cache.cache_path("/alice/a.txt");

        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(path.parent().unwrap(), cache.directory());
        assert_ne!(cache.cache_path("/alice/b.txt"), path);
        assert_eq!(
            cache.cache_path(""),
            cache
                .directory()
                .join("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[tokio::test]
    async fn test_download_then_delete() {
        let (_temp, objects, cache) = create_test_cache();
        let resource = file("/alice/a.txt");
        objects.put("alice/a.txt", b"data").await.unwrap();

        assert!(cache.cached_file_for_path("/alice/a.txt").await.unwrap().is_none());
        let cached = cache.download_resource_to_cache(&resource).await.unwrap();
        assert_eq!(std::fs::read(&cached).unwrap(), b"data");
        assert_eq!(
            cache.cached_file_for_path("/alice/a.txt").await.unwrap(),
            Some(cached.clone())
        );

        assert!(cache.delete_resource_from_cache(&resource).await.unwrap());
        assert!(!cache.delete_resource_from_cache(&resource).await.unwrap());
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let (_temp, _objects, cache) = create_test_cache();
        let resource = file("/alice/missing.txt");

        let result = cache.download_resource_to_cache(&resource).await;
        assert!(matches!(result, Err(CairnError::NotFound(_))));
        assert_eq!(std::fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_directories_are_not_cached() {
        let (_temp, _objects, cache) = create_test_cache();
        let dir = Resource::new_directory("/alice", "alice").unwrap();
        let result = cache.download_resource_to_cache(&dir).await;
        assert!(matches!(result, Err(CairnError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_download_url_only_for_cached_resources() {
        let (_temp, objects, cache) = create_test_cache();
        let resource = file("/alice/my photo.jpg");
        objects.put("alice/my photo.jpg", b"jpeg").await.unwrap();

        assert!(cache
            .cached_download_url_for_resource(&resource)
            .await
            .unwrap()
            .is_none());

        cache.download_resource_to_cache(&resource).await.unwrap();
        let now = Utc::now();
        let url = cache
            .cached_download_url_at(&resource, now)
            .await
            .unwrap()
            .unwrap();

        let segments: Vec<_> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(&segments[..2], &["static", "cache"]);
        assert_eq!(segments[3], "my%20photo.jpg");
        assert!(url.as_str().starts_with("https://files.test/static/cache/"));

        let token = cache.verify_token_at(segments[2], now).unwrap();
        assert_eq!(token.path, "/alice/my photo.jpg");
        assert_eq!(token.expires_at.timestamp(), now.timestamp() + 300);

        let (granted, file) = cache.open_token(segments[2]).await.unwrap();
        assert_eq!(granted, token);
        assert_eq!(std::fs::read(file).unwrap(), b"jpeg");
    }

    #[test]
    fn test_token_expiry_and_tampering() {
        let (_temp, _objects, cache) = create_test_cache();
        let now = Utc::now();
        let token = cache
            .sign_token(&CacheToken {
                path: "/alice/a.txt".to_string(),
                expires_at: now,
            })
            .unwrap();

        assert!(cache.verify_token_at(&token, now).is_ok());
        assert!(matches!(
            cache.verify_token_at(&token, now + chrono::Duration::seconds(1)),
            Err(CairnError::Signature(_))
        ));

        let (payload, signature) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(format!("{}\n/bob/secret.txt", now.timestamp()));
        for bad in [
            format!("{forged_payload}.{signature}"),
            format!("{payload}.{}", &signature[1..]),
            payload.to_string(),
            String::new(),
        ] {
            assert!(
                matches!(cache.verify_token_at(&bad, now), Err(CairnError::Signature(_))),
                "token {bad:?} was accepted"
            );
        }
    }

    #[test]
    fn test_tokens_are_bound_to_the_key() {
        let (temp, objects, cache) = create_test_cache();
        let other = LocalCache::new(
            temp.path().join("other"),
            b"other-key",
            Url::parse("https://files.test/").unwrap(),
            Duration::from_secs(300),
            BlobStore::new(objects, Duration::from_secs(60)),
        )
        .unwrap();

        let token = cache
            .sign_token(&CacheToken {
                path: "/alice/a.txt".to_string(),
                expires_at: Utc::now() + chrono::Duration::seconds(60),
            })
            .unwrap();
        assert!(other.verify_token(&token).is_err());
    }

    #[tokio::test]
    async fn test_open_token_after_eviction() {
        let (_temp, objects, cache) = create_test_cache();
        let resource = file("/alice/a.txt");
        objects.put("alice/a.txt", b"data").await.unwrap();
        cache.download_resource_to_cache(&resource).await.unwrap();

        let url = cache
            .cached_download_url_for_resource(&resource)
            .await
            .unwrap()
            .unwrap();
        let token = url.path_segments().unwrap().nth(2).unwrap().to_string();
        cache.delete_resource_from_cache(&resource).await.unwrap();

        assert!(matches!(
            cache.open_token(&token).await,
            Err(CairnError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_async_operations_run_on_pool() {
        let (_temp, objects, cache) = create_test_cache();
        let pool = TaskPool::new(2);
        let resource = file("/alice/a.txt");
        objects.put("alice/a.txt", b"data").await.unwrap();

        let cached = cache
            .download_resource_to_cache_async(resource.clone(), &pool)
            .unwrap()
            .join()
            .await
            .unwrap();
        assert!(cached.exists());

        let removed = cache
            .delete_resource_from_cache_async(resource, &pool)
            .unwrap()
            .join()
            .await
            .unwrap();
        assert!(removed);
        assert!(!cached.exists());
    }

    #[test]
    fn test_new_rejects_empty_key() {
        let temp = TempDir::new().unwrap();
        let blobs = BlobStore::new(Arc::new(MemoryObjectStore::new()), Duration::from_secs(60));
        let result = LocalCache::new(
            temp.path(),
            b"",
            Url::parse("https://files.test/").unwrap(),
            Duration::from_secs(60),
            blobs,
        );
        assert!(matches!(result, Err(CairnError::Config(_))));
    }
}
