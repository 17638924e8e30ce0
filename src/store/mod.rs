//! Metadata engine for Cairn.
//!
//! [`ResourceStore`] emulates a directory tree over a flat metadata store.
//! Records are keyed by path, `parent` acts as a secondary index, and a
//! directory's descendants are found with a prefix scan on the path.
//!
//! The backing store is abstracted by [`MetadataStore`]; two backends ship
//! with the crate:
//! - [`SqliteMetadataStore`]: durable storage through sqlx
//! - [`MemoryMetadataStore`]: in-process map with a child-adjacency index

mod memory;
mod sqlite;

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::pool::{TaskHandle, TaskPool};
use crate::resource::{child_prefix, validate_path, Resource, ResourceType, Visibility, ROOT_PATH};
use crate::{CairnError, Result};

/// Attribute filter applied by [`MetadataStore::query_by_parent`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildFilter {
    /// Keep only these visibilities. `None` keeps all.
    pub visibility: Option<Vec<Visibility>>,
    /// Keep only this type. `None` keeps all.
    pub resource_type: Option<ResourceType>,
}

impl ChildFilter {
    /// Filter that keeps every child.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a set of visibilities.
    pub fn with_visibility(mut self, visibility: &[Visibility]) -> Self {
        self.visibility = Some(visibility.to_vec());
        self
    }

    /// Restrict to a resource type.
    pub fn with_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    /// Check a resource against the filter.
    pub fn matches(&self, resource: &Resource) -> bool {
        let visibility_ok = self
            .visibility
            .as_ref()
            .map_or(true, |set| set.contains(&resource.visibility()));
        let type_ok = self
            .resource_type
            .map_or(true, |t| t == resource.resource_type());
        visibility_ok && type_ok
    }
}

/// Access patterns required from the external metadata store.
///
/// Implementations need single-record atomicity only. Deleting an absent
/// key is a no-op, never an error.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Every record stored under `path`. A healthy store returns at most one.
    async fn get(&self, path: &str) -> Result<Vec<Resource>>;

    /// Insert or replace the record keyed by the resource's path.
    async fn put(&self, resource: &Resource) -> Result<()>;

    /// Delete the record at `path`, returning whether one existed.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Records whose parent equals `parent`, narrowed by `filter`.
    async fn query_by_parent(&self, parent: &str, filter: &ChildFilter) -> Result<Vec<Resource>>;

    /// Records whose path begins with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Resource>>;

    /// Every record.
    async fn scan_all(&self) -> Result<Vec<Resource>>;
}

/// Outcome of a point lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Exactly one record.
    Found(Resource),
    /// No record.
    NotFound,
    /// More than one record under a key that should be unique.
    Duplicate {
        /// Number of records returned.
        count: usize,
    },
}

impl Lookup {
    /// Classify the rows returned for a unique key.
    pub fn from_rows(mut rows: Vec<Resource>) -> Self {
        match rows.len() {
            0 => Lookup::NotFound,
            1 => rows.pop().map_or(Lookup::NotFound, Lookup::Found),
            count => Lookup::Duplicate { count },
        }
    }

    /// The resource, if exactly one was found.
    pub fn into_resource(self) -> Option<Resource> {
        match self {
            Lookup::Found(resource) => Some(resource),
            _ => None,
        }
    }
}

/// Ordering applied to a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortPolicy {
    /// Directories first, then files, each ascending by path.
    #[default]
    None,
    /// Favorite directories, then favorite files, then everything else.
    Favorite,
}

impl SortPolicy {
    fn sort(self, resources: &mut [Resource]) {
        match self {
            SortPolicy::None => resources.sort_by(|a, b| {
                (a.is_file(), a.path()).cmp(&(b.is_file(), b.path()))
            }),
            SortPolicy::Favorite => resources.sort_by(|a, b| {
                (!a.favorite(), a.is_file(), a.path()).cmp(&(!b.favorite(), b.is_file(), b.path()))
            }),
        }
    }
}

/// Path-keyed tree of resources over a [`MetadataStore`].
#[derive(Clone)]
pub struct ResourceStore {
    metadata: Arc<dyn MetadataStore>,
}

impl ResourceStore {
    /// Create an engine over a metadata backend.
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Point lookup that tells a missing record apart from duplicates.
    pub async fn lookup_resource_at_path(&self, path: &str) -> Result<Lookup> {
        validate_path(path)?;
        let rows = self.metadata.get(path).await?;
        Ok(Lookup::from_rows(rows))
    }

    /// Point lookup by path.
    ///
    /// Duplicates are logged and reported as absent.
    pub async fn get_resource_at_path(&self, path: &str) -> Result<Option<Resource>> {
        match self.lookup_resource_at_path(path).await? {
            Lookup::Found(resource) => Ok(Some(resource)),
            Lookup::NotFound => {
                debug!("No resource at {}", path);
                Ok(None)
            }
            Lookup::Duplicate { count } => {
                error!(
                    "Integrity violation: {} records found at {}, treating as absent",
                    count, path
                );
                Ok(None)
            }
        }
    }

    /// Store a new resource (upsert by path).
    ///
    /// The parent directory is not checked.
    pub async fn create_resource(&self, resource: &Resource) -> Result<()> {
        debug!("Creating {} {}", resource.resource_type(), resource.path());
        self.metadata.put(resource).await
    }

    /// Store changes to a resource (upsert by path).
    pub async fn update_resource(&self, resource: &Resource) -> Result<()> {
        debug!("Updating {}", resource.path());
        self.metadata.put(resource).await
    }

    /// Delete a resource, cascading to every descendant of a directory.
    ///
    /// Descendants go first, deepest paths before shallower ones, and the
    /// directory's own record goes last. Rerunning after a partial failure
    /// finishes the job. Absent records are skipped.
    pub async fn delete_resource(&self, resource: &Resource) -> Result<()> {
        if resource.is_file() {
            let existed = self.metadata.delete(resource.path()).await?;
            debug!("Deleted file {} (existed: {})", resource.path(), existed);
            return Ok(());
        }

        let prefix = child_prefix(resource.path());
        let mut descendants = self.metadata.scan_prefix(&prefix).await?;
        descendants.retain(|r| r.path() != resource.path());
        descendants.sort_by(|a, b| b.path().len().cmp(&a.path().len()));

        let count = descendants.len();
        for child in &descendants {
            self.metadata.delete(child.path()).await?;
        }
        self.metadata.delete(resource.path()).await?;

        info!(
            "Deleted directory {} and {} descendant(s)",
            resource.path(),
            count
        );
        Ok(())
    }

    /// Run [`delete_resource`](Self::delete_resource) on the pool.
    ///
    /// The returned handle may be awaited for the outcome or dropped.
    pub fn delete_resource_async(
        &self,
        resource: Resource,
        pool: &TaskPool,
    ) -> Result<TaskHandle<()>> {
        let store = self.clone();
        let name = format!("delete-resource {}", resource.path());
        pool.submit(name, async move { store.delete_resource(&resource).await })
    }

    /// Children of a directory with a visibility in `visibility`, ordered per `sort`.
    pub async fn list_directory(
        &self,
        directory: &Resource,
        visibility: &[Visibility],
        sort: SortPolicy,
    ) -> Result<Vec<Resource>> {
        if !directory.is_directory() {
            return Err(CairnError::InvalidArgument(format!(
                "not a directory: {}",
                directory.path()
            )));
        }
        if visibility.is_empty() {
            return Ok(Vec::new());
        }

        let filter = ChildFilter::new().with_visibility(visibility);
        let mut children = self
            .metadata
            .query_by_parent(directory.path(), &filter)
            .await?;
        children.retain(|r| r.path() != ROOT_PATH);
        sort.sort(&mut children);

        Ok(children)
    }

    /// Every record below a directory, ascending by path.
    pub async fn list_descendants(&self, directory: &Resource) -> Result<Vec<Resource>> {
        if !directory.is_directory() {
            return Err(CairnError::InvalidArgument(format!(
                "not a directory: {}",
                directory.path()
            )));
        }
        let mut descendants = self
            .metadata
            .scan_prefix(&child_prefix(directory.path()))
            .await?;
        descendants.retain(|r| r.path() != directory.path());
        descendants.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(descendants)
    }

    /// Top-level directories, ascending by path.
    pub async fn list_home_directories(&self) -> Result<Vec<Resource>> {
        let filter = ChildFilter::new().with_type(ResourceType::Directory);
        let mut homes = self.metadata.query_by_parent(ROOT_PATH, &filter).await?;
        homes.retain(|r| r.path() != ROOT_PATH);
        homes.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(homes)
    }

    /// Every stored resource, ascending by path.
    pub async fn list_all(&self) -> Result<Vec<Resource>> {
        let mut all = self.metadata.scan_all().await?;
        all.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(all)
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore").finish()
    }
}
