//! Sizer job.
//!
//! Walks every home directory depth first. Each file's size is checked
//! against its object and its cost recomputed; each directory receives the
//! aggregate size and cost of everything beneath it. Records are written
//! back only when something changed.

use std::future::Future;
use std::ops::AddAssign;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::Job;
use crate::blob::BlobStore;
use crate::cost::CostAnalyzer;
use crate::format::{human_readable_bytes, human_readable_cost};
use crate::resource::{Resource, Visibility};
use crate::retry::Backoff;
use crate::store::{ResourceStore, SortPolicy};
use crate::Result;

/// Aggregate of a sized subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeNode {
    /// Number of files sized.
    pub resources: u64,
    /// Total bytes.
    pub size: i64,
    /// Total monthly cost.
    pub cost: Decimal,
}

impl TreeNode {
    /// A node for a single file.
    pub fn file(size: i64, cost: Decimal) -> Self {
        Self {
            resources: 1,
            size,
            cost,
        }
    }
}

impl AddAssign for TreeNode {
    fn add_assign(&mut self, other: Self) {
        self.resources += other.resources;
        self.size += other.size;
        self.cost += other.cost;
    }
}

type SizeFuture<'a> = Pin<Box<dyn Future<Output = Result<TreeNode>> + Send + 'a>>;

/// Recomputes sizes and costs across the tree.
pub struct Sizer {
    resources: ResourceStore,
    blobs: BlobStore,
    analyzer: Arc<dyn CostAnalyzer>,
    backoff: Backoff,
}

impl Sizer {
    /// Create a sizer.
    pub fn new(
        resources: ResourceStore,
        blobs: BlobStore,
        analyzer: Arc<dyn CostAnalyzer>,
        backoff: Backoff,
    ) -> Self {
        Self {
            resources,
            blobs,
            analyzer,
            backoff,
        }
    }

    /// Size every home directory, returning the grand total.
    pub async fn run(&self) -> Result<TreeNode> {
        let homes = self
            .backoff
            .call(|| self.resources.list_home_directories())
            .await?;

        let mut total = TreeNode::default();
        for home in homes {
            let start = Instant::now();
            let node = self.size_resource(home.clone()).await?;

            info!(
                "Sized ({}) and cost-analyzed ({}) {} resource(s) under home directory {} in {:.2}s",
                human_readable_bytes(node.size),
                human_readable_cost(node.cost),
                node.resources,
                home.path(),
                start.elapsed().as_secs_f64()
            );
            total += node;
        }

        Ok(total)
    }

    /// Size one resource and everything beneath it.
    pub fn size_resource(&self, resource: Resource) -> SizeFuture<'_> {
        Box::pin(async move {
            if resource.is_file() {
                self.size_file(resource).await
            } else {
                self.size_directory(resource).await
            }
        })
    }

    async fn size_file(&self, mut resource: Resource) -> Result<TreeNode> {
        let object_size = self
            .backoff
            .call(|| self.blobs.resource_object_size(&resource))
            .await?;

        let Some(object_size) = object_size else {
            warn!("Sizer skipping resource with no stored object: {}", resource.path());
            return Ok(TreeNode::default());
        };
        let object_size = i64::try_from(object_size).unwrap_or(i64::MAX);

        let mut changed = false;
        if object_size != resource.size() {
            warn!(
                "Resource metadata does not match object size ({} != {}): {}",
                resource.size(),
                object_size,
                resource.path()
            );
            resource.set_size(object_size)?;
            changed = true;
        }

        let cost = self.analyzer.compute_resource_cost(&resource);
        if cost != resource.cost() {
            resource.set_cost(cost);
            changed = true;
        }

        if changed {
            self.backoff
                .call(|| self.resources.update_resource(&resource))
                .await?;
        }

        Ok(TreeNode::file(resource.size(), resource.cost()))
    }

    async fn size_directory(&self, mut resource: Resource) -> Result<TreeNode> {
        let children = self
            .backoff
            .call(|| {
                self.resources
                    .list_directory(&resource, &Visibility::ALL, SortPolicy::None)
            })
            .await?;

        let mut node = TreeNode::default();
        for child in children {
            let path = child.path().to_string();
            match self.size_resource(child).await {
                Ok(child_node) => node += child_node,
                Err(e) => warn!("Skipping resource that failed to size: {}: {}", path, e),
            }
        }

        if node.size != resource.size() || node.cost != resource.cost() {
            resource.set_size(node.size)?;
            resource.set_cost(node.cost);
            self.backoff
                .call(|| self.resources.update_resource(&resource))
                .await?;
        }

        debug!(
            "Sized {} ({}, {})",
            resource.path(),
            human_readable_bytes(resource.size()),
            human_readable_cost(resource.cost())
        );
        Ok(node)
    }
}

#[async_trait]
impl Job for Sizer {
    fn name(&self) -> &'static str {
        "sizer"
    }

    async fn run_once(&self) -> Result<()> {
        let total = self.run().await?;
        info!(
            "Sizer finished: {} resource(s), {}, {}",
            total.resources,
            human_readable_bytes(total.size),
            human_readable_cost(total.cost)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{MemoryObjectStore, ObjectStore};
    use crate::cost::{TieredCostAnalyzer, BYTES_PER_GIB};
    use crate::store::MemoryMetadataStore;
    use std::time::Duration;

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        resources: ResourceStore,
        sizer: Sizer,
    }

    fn fixture() -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new());
        let blobs = BlobStore::new(objects.clone(), Duration::from_secs(60));
        let resources = ResourceStore::new(Arc::new(MemoryMetadataStore::new()));
        let sizer = Sizer::new(
            resources.clone(),
            blobs,
            Arc::new(TieredCostAnalyzer::default()),
            Backoff::new(2, Duration::from_millis(1)),
        );
        Fixture {
            objects,
            resources,
            sizer,
        }
    }

    async fn get(resources: &ResourceStore, path: &str) -> Resource {
        resources.get_resource_at_path(path).await.unwrap().unwrap()
    }

    #[test]
    fn test_tree_node_add() {
        let mut node = TreeNode::default();
        node += TreeNode::file(10, Decimal::new(1, 2));
        node += TreeNode::file(5, Decimal::new(2, 2));
        assert_eq!(node.resources, 2);
        assert_eq!(node.size, 15);
        assert_eq!(node.cost, Decimal::new(3, 2));
    }

    #[tokio::test]
    async fn test_sizes_tree_and_aggregates_directories() {
        let f = fixture();
        for dir in ["/alice", "/alice/docs"] {
            f.resources
                .create_resource(&Resource::new_directory(dir, "alice").unwrap())
                .await
                .unwrap();
        }
        // Metadata claims 1 byte, the object holds 4
        f.resources
            .create_resource(&Resource::new_file("/alice/a.txt", "alice", 1).unwrap())
            .await
            .unwrap();
        f.resources
            .create_resource(&Resource::new_file("/alice/docs/b.txt", "alice", 6).unwrap())
            .await
            .unwrap();
        f.objects.put("alice/a.txt", b"abcd").await.unwrap();
        f.objects.put("alice/docs/b.txt", b"abcdef").await.unwrap();

        let total = f.sizer.run().await.unwrap();
        assert_eq!(total.resources, 2);
        assert_eq!(total.size, 10);

        assert_eq!(get(&f.resources, "/alice/a.txt").await.size(), 4);
        assert_eq!(get(&f.resources, "/alice/docs").await.size(), 6);
        let home = get(&f.resources, "/alice").await;
        assert_eq!(home.size(), 10);
        assert!(home.cost() > Decimal::ZERO);
        assert_eq!(home.cost(), total.cost);
    }

    #[tokio::test]
    async fn test_missing_object_is_skipped() {
        let f = fixture();
        f.resources
            .create_resource(&Resource::new_directory("/bob", "bob").unwrap())
            .await
            .unwrap();
        f.resources
            .create_resource(&Resource::new_file("/bob/ghost.bin", "bob", 100).unwrap())
            .await
            .unwrap();

        let total = f.sizer.run().await.unwrap();
        assert_eq!(total.resources, 0);
        assert_eq!(total.size, 0);

        // The file record is left alone
        assert_eq!(get(&f.resources, "/bob/ghost.bin").await.size(), 100);
    }

    /// Charges one dollar per byte, whatever the age.
    struct PerByte;

    impl CostAnalyzer for PerByte {
        fn compute_cost(&self, size_bytes: i64, _reference: chrono::DateTime<chrono::Utc>) -> Decimal {
            Decimal::from(size_bytes)
        }
    }

    #[tokio::test]
    async fn test_directory_cost_is_sum_of_children() {
        let objects = Arc::new(MemoryObjectStore::new());
        let resources = ResourceStore::new(Arc::new(MemoryMetadataStore::new()));
        let sizer = Sizer::new(
            resources.clone(),
            BlobStore::new(objects.clone(), Duration::from_secs(60)),
            Arc::new(PerByte),
            Backoff::new(1, Duration::ZERO),
        );

        resources
            .create_resource(&Resource::new_directory("/carol", "carol").unwrap())
            .await
            .unwrap();
        for (path, key, data) in [
            ("/carol/a", "carol/a", b"12".as_slice()),
            ("/carol/b", "carol/b", b"12345".as_slice()),
        ] {
            resources
                .create_resource(&Resource::new_file(path, "carol", 0).unwrap())
                .await
                .unwrap();
            objects.put(key, data).await.unwrap();
        }

        sizer.run().await.unwrap();

        assert_eq!(get(&resources, "/carol/a").await.cost(), Decimal::from(2));
        assert_eq!(get(&resources, "/carol/b").await.cost(), Decimal::from(5));
        assert_eq!(get(&resources, "/carol").await.cost(), Decimal::from(7));
    }

    #[test]
    fn test_gib_file_node() {
        let analyzer = TieredCostAnalyzer::default();
        let now = chrono::Utc::now();
        let node = TreeNode::file(BYTES_PER_GIB, analyzer.compute_cost_at(BYTES_PER_GIB, now, now));
        assert_eq!(node.cost, Decimal::new(23, 3));
    }

    #[tokio::test]
    async fn test_unchanged_tree_is_stable() {
        let f = fixture();
        f.resources
            .create_resource(&Resource::new_directory("/dave", "dave").unwrap())
            .await
            .unwrap();
        f.resources
            .create_resource(&Resource::new_file("/dave/x", "dave", 3).unwrap())
            .await
            .unwrap();
        f.objects.put("dave/x", b"xyz").await.unwrap();

        let first = f.sizer.run().await.unwrap();
        let second = f.sizer.run().await.unwrap();
        assert_eq!(first, second);
    }
}
