//! Filesystem object backend.
//!
//! Objects are stored as plain files whose relative path is the object key:
//! ```text
//! {base_path}/
//! ├── alice/
//! │   ├── notes.txt
//! │   └── photos/
//! │       └── cat.jpg
//! └── bob/
//!     └── ...
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use super::{HttpMethod, ObjectInfo, ObjectPage, ObjectStore, PresignRequest, UrlSigner, VerifiedRequest};
use crate::{CairnError, Result};

/// Object store keeping each object as a file under a base directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStore {
    /// Create a store rooted at `base_path`.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>, signer: UrlSigner) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path, signer })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Verify a presigned URL issued by this store.
    pub fn verify(&self, url: &Url, method: HttpMethod) -> Result<VerifiedRequest> {
        self.signer.verify(url, method)
    }

    /// Map a key to its file, rejecting keys that could escape the base.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(CairnError::InvalidArgument("object key cannot be empty".to_string()));
        }

        let relative = Path::new(key);
        let safe = key.split('/').all(|s| !s.is_empty() && s != "." && s != "..")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CairnError::InvalidArgument(format!("invalid object key: {key}")));
        }

        Ok(self.base_path.join(relative))
    }

    /// Remove empty directories between `path` and the base.
    async fn prune_empty_dirs(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            // Fails on non-empty directories, which ends the walk
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

type KeyEntry = (String, u64, Option<DateTime<Utc>>);

/// Walks the object tree in key order, collecting at most `limit` keys that
/// start with `prefix` and sort after `after`.
///
/// Subtrees that cannot hold a matching key are never read, and the walk
/// stops as soon as the page is full.
struct KeyWalk<'a> {
    prefix: &'a str,
    after: Option<&'a str>,
    limit: usize,
    out: Vec<KeyEntry>,
}

impl<'a> KeyWalk<'a> {
    fn new(prefix: &'a str, after: Option<&'a str>, limit: usize) -> Self {
        Self {
            prefix,
            after,
            limit,
            out: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.out.len() >= self.limit
    }

    /// Whether any key under the directory whose keys start with
    /// `dir_prefix` could be part of the page.
    fn may_contain(&self, dir_prefix: &str) -> bool {
        let prefix_overlaps =
            dir_prefix.starts_with(self.prefix) || self.prefix.starts_with(dir_prefix);
        let reaches_past = self
            .after
            .map_or(true, |after| after.starts_with(dir_prefix) || dir_prefix > after);
        prefix_overlaps && reaches_past
    }

    fn wants(&self, key: &str) -> bool {
        key.starts_with(self.prefix) && self.after.map_or(true, |after| key > after)
    }

    fn walk(&mut self, dir: &Path, dir_key: &str) -> io::Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        // (sort key, object key, path, is directory)
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry?;
            // Names that are not UTF-8 cannot be object keys
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let key = if dir_key.is_empty() {
                name
            } else {
                format!("{dir_key}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                children.push((format!("{key}/"), key, entry.path(), true));
            } else if file_type.is_file() {
                children.push((key.clone(), key, entry.path(), false));
            }
        }
        // A directory's keys all share "name/", so sorting on that puts
        // them where they belong relative to sibling files
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (sort_key, key, path, is_dir) in children {
            if self.is_full() {
                break;
            }
            if is_dir {
                if self.may_contain(&sort_key) {
                    self.walk(&path, &key)?;
                }
            } else if self.wants(&key) {
                let metadata = std::fs::metadata(&path)?;
                let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
                self.out.push((key, metadata.len(), modified));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!("Stored object {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CairnError::NotFound(format!("object {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(Some(m.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_dirs(&path).await;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectPage> {
        let base = self.base_path.clone();
        let limit = max_keys.max(1);
        let owned_prefix = prefix.to_string();
        let owned_after = continuation.map(str::to_string);

        // One extra key tells whether another page follows
        let mut entries = tokio::task::spawn_blocking(move || {
            let mut walk = KeyWalk::new(&owned_prefix, owned_after.as_deref(), limit.saturating_add(1));
            walk.walk(&base, "").map(|_| walk.out)
        })
        .await
        .map_err(|e| CairnError::Storage(format!("listing task failed: {e}")))??;

        let continuation = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(|(key, _, _)| key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: entries
                .into_iter()
                .map(|(key, size, last_modified)| ObjectInfo {
                    key,
                    size,
                    last_modified,
                })
                .collect(),
            continuation,
        })
    }

    fn presign(&self, request: &PresignRequest) -> Result<Url> {
        self.object_path(&request.key)?;
        self.signer.sign(request)
    }
}
