//! Test helpers for Cairn integration tests.
//!
//! Builds engines over either metadata backend and seeds a small tree.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use url::Url;

use cairn::{
    BlobStore, Database, LocalObjectStore, MemoryMetadataStore, Resource, ResourceStore,
    SqliteMetadataStore, UrlSigner, Visibility,
};
use cairn::resource::NewResource;

/// Signing key shared by every test store.
pub const TEST_SIGNING_KEY: &str = "integration-test-key";

/// Metadata backends under test.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Memory, Backend::Sqlite];
}

/// Create a resource engine over a fresh backend.
pub async fn resource_store(backend: Backend) -> ResourceStore {
    match backend {
        Backend::Memory => ResourceStore::new(Arc::new(MemoryMetadataStore::new())),
        Backend::Sqlite => {
            let db = Database::open_in_memory().await.unwrap();
            ResourceStore::new(Arc::new(SqliteMetadataStore::from_database(&db)))
        }
    }
}

/// Signer issuing URLs under a fixed test origin.
pub fn signer() -> UrlSigner {
    let base = Url::parse("https://files.test/objects/").unwrap();
    UrlSigner::new(TEST_SIGNING_KEY, base).unwrap()
}

/// A filesystem object store in a temporary directory.
pub struct TestObjects {
    pub dir: TempDir,
    pub store: Arc<LocalObjectStore>,
}

impl TestObjects {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path().join("objects"), signer()).unwrap());
        Self { dir, store }
    }

    /// Blob engine over this store with the given listing page size.
    pub fn blobs(&self, page_size: usize) -> BlobStore {
        BlobStore::new(self.store.clone(), Duration::from_secs(600)).with_page_size(page_size)
    }
}

pub async fn create_directory(store: &ResourceStore, path: &str, owner: &str) -> Resource {
    let dir = Resource::new_directory(path, owner).unwrap();
    store.create_resource(&dir).await.unwrap();
    dir
}

pub async fn create_file(store: &ResourceStore, path: &str, owner: &str, size: i64) -> Resource {
    let file = Resource::new_file(path, owner, size).unwrap();
    store.create_resource(&file).await.unwrap();
    file
}

pub async fn create_public_file(store: &ResourceStore, path: &str, owner: &str) -> Resource {
    let file = Resource::new(NewResource::file(path, owner, 0).with_visibility(Visibility::Public)).unwrap();
    store.create_resource(&file).await.unwrap();
    file
}

/// Seed the tree used by most tests:
///
/// ```text
/// /alice
/// /alice/docs
/// /alice/docs/a.txt
/// /alice/docs/deep
/// /alice/docs/deep/b.txt
/// /alice/photo.jpg
/// /alice2
/// /alice2/c.txt
/// /bob
/// ```
pub async fn seed_tree(store: &ResourceStore) {
    create_directory(store, "/alice", "alice").await;
    create_directory(store, "/alice/docs", "alice").await;
    create_file(store, "/alice/docs/a.txt", "alice", 3).await;
    create_directory(store, "/alice/docs/deep", "alice").await;
    create_file(store, "/alice/docs/deep/b.txt", "alice", 5).await;
    create_file(store, "/alice/photo.jpg", "alice", 7).await;
    create_directory(store, "/alice2", "alice2").await;
    create_file(store, "/alice2/c.txt", "alice2", 1).await;
    create_directory(store, "/bob", "bob").await;
}

/// Every stored path, ascending.
pub async fn all_paths(store: &ResourceStore) -> Vec<String> {
    store
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.path().to_string())
        .collect()
}
