//! Reaper job.
//!
//! Walks every object in the object store and checks that a resource still
//! points at it. Objects without a resource can never be reached again, so
//! they are deleted. This keeps the object store in line with the tree
//! after partial deletes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::Job;
use crate::blob::BlobStore;
use crate::retry::Backoff;
use crate::store::ResourceStore;
use crate::Result;

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaperReport {
    /// Objects examined.
    pub scanned: u64,
    /// Dangling objects deleted.
    pub deleted: u64,
}

/// Deletes objects no resource refers to.
pub struct Reaper {
    resources: ResourceStore,
    blobs: BlobStore,
    backoff: Backoff,
    iteration_throttle: Duration,
}

impl Reaper {
    /// Create a reaper pausing `iteration_throttle` after each object.
    pub fn new(
        resources: ResourceStore,
        blobs: BlobStore,
        backoff: Backoff,
        iteration_throttle: Duration,
    ) -> Self {
        Self {
            resources,
            blobs,
            backoff,
            iteration_throttle,
        }
    }

    /// Scan every object once.
    pub async fn run(&self) -> Result<ReaperReport> {
        let start = Instant::now();
        let mut report = ReaperReport::default();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .backoff
                .call(|| self.blobs.list_page("", continuation.as_deref()))
                .await?;

            for object in &page.objects {
                report.scanned += 1;
                let path = format!("/{}", object.key);

                let lookup = self
                    .backoff
                    .call(|| self.resources.get_resource_at_path(&path))
                    .await;

                match lookup {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        let deleted = self
                            .backoff
                            .call(|| self.blobs.delete_object(&object.key))
                            .await;
                        match deleted {
                            Ok(_) => {
                                report.deleted += 1;
                                info!("Deleted dangling object: {}", path);
                            }
                            Err(e) => error!("Failed to delete dangling object {}: {}", path, e),
                        }
                    }
                    Err(e) => warn!("Skipping object that failed lookup: {}: {}", path, e),
                }

                if !self.iteration_throttle.is_zero() {
                    tokio::time::sleep(self.iteration_throttle).await;
                }
            }

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        info!(
            "Reaper scanned {} object(s) and deleted {} in {:.2}s",
            report.scanned,
            report.deleted,
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}

#[async_trait]
impl Job for Reaper {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run_once(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{MemoryObjectStore, ObjectStore};
    use crate::resource::Resource;
    use crate::store::MemoryMetadataStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deletes_only_dangling_objects() {
        let objects = Arc::new(MemoryObjectStore::new().with_page_size(2));
        let resources = ResourceStore::new(Arc::new(MemoryMetadataStore::new()));
        let blobs = BlobStore::new(objects.clone(), Duration::from_secs(60)).with_page_size(2);
        let reaper = Reaper::new(
            resources.clone(),
            blobs,
            Backoff::new(2, Duration::from_millis(1)),
            Duration::ZERO,
        );

        resources
            .create_resource(&Resource::new_file("/alice/kept.txt", "alice", 1).unwrap())
            .await
            .unwrap();
        resources
            .create_resource(&Resource::new_file("/bob/kept.txt", "bob", 1).unwrap())
            .await
            .unwrap();
        for key in [
            "alice/kept.txt",
            "alice/orphan-1.txt",
            "alice/orphan-2.txt",
            "bob/kept.txt",
            "carol/orphan.txt",
        ] {
            objects.put(key, b"x").await.unwrap();
        }

        let report = reaper.run().await.unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.deleted, 3);
        assert_eq!(objects.keys().await, vec!["alice/kept.txt", "bob/kept.txt"]);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let objects = Arc::new(MemoryObjectStore::new());
        let reaper = Reaper::new(
            ResourceStore::new(Arc::new(MemoryMetadataStore::new())),
            BlobStore::new(objects, Duration::from_secs(60)),
            Backoff::new(1, Duration::ZERO),
            Duration::from_millis(1),
        );

        assert_eq!(reaper.run().await.unwrap(), ReaperReport::default());
    }

    #[tokio::test]
    async fn test_invalid_key_is_skipped() {
        let objects = Arc::new(MemoryObjectStore::new());
        objects.put("a//b", b"x").await.unwrap();
        let reaper = Reaper::new(
            ResourceStore::new(Arc::new(MemoryMetadataStore::new())),
            BlobStore::new(objects.clone(), Duration::from_secs(60)),
            Backoff::new(1, Duration::ZERO),
            Duration::ZERO,
        );

        let report = reaper.run().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(objects.keys().await.len(), 1);
    }
}
