//! Application wiring.
//!
//! Builds the stores, engines and background machinery from a [`Config`]
//! and owns them for the life of the process.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::blob::{BlobStore, LocalCache, LocalObjectStore, UrlSigner};
use crate::config::Config;
use crate::cost::{CostAnalyzer, TieredCostAnalyzer};
use crate::db::Database;
use crate::error::Result;
use crate::filter::ResourceFilter;
use crate::jobs::{self, Job, Reaper, Sizer};
use crate::pool::{TaskHandle, TaskPool};
use crate::resource::{Resource, Visibility};
use crate::store::{ResourceStore, SortPolicy, SqliteMetadataStore};
use crate::CairnError;

/// Everything a running Cairn instance needs.
pub struct Application {
    config: Arc<Config>,
    db: Database,
    resources: ResourceStore,
    blobs: BlobStore,
    objects: Arc<LocalObjectStore>,
    cache: Option<LocalCache>,
    pool: Arc<TaskPool>,
    analyzer: Arc<TieredCostAnalyzer>,
    filter: ResourceFilter,
}

impl Application {
    /// Open the database named in the config and build the application.
    pub async fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.database.path).await?;
        Self::new(config, db)
    }

    /// Build the application around an already open database.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        config.validate()?;

        let public_url = Url::parse(&config.storage.public_url)
            .map_err(|e| CairnError::Config(format!("invalid public_url: {e}")))?;
        let signer = UrlSigner::new(&config.storage.signing_key, public_url)?;
        let objects = Arc::new(LocalObjectStore::new(&config.storage.root, signer)?);

        let resources = ResourceStore::new(Arc::new(SqliteMetadataStore::from_database(&db)));
        let blobs = BlobStore::new(objects.clone(), config.storage.url_validity())
            .with_page_size(config.storage.list_page_size);
        let cache = if config.cache.enabled {
            Some(LocalCache::from_config(
                &config.cache,
                &config.storage.signing_key,
                blobs.clone(),
            )?)
        } else {
            None
        };
        let analyzer = Arc::new(TieredCostAnalyzer::from_tiers(config.sizer.tiers.clone())?);
        let filter = ResourceFilter::from_config(&config.filter)?;
        let pool = Arc::new(TaskPool::from_config(&config.pool));

        info!(
            "Cairn ready (objects: {}, cache: {}, pool size: {}, tiers: {})",
            objects.base_path().display(),
            cache
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |c| c.directory().display().to_string()),
            pool.size(),
            analyzer.tiers().as_slice().len()
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            resources,
            blobs,
            objects,
            cache,
            pool,
            analyzer,
            filter,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the resource engine.
    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Get the blob engine.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Get the filesystem object backend.
    pub fn objects(&self) -> &LocalObjectStore {
        &self.objects
    }

    /// Get the local download cache, when enabled.
    pub fn cache(&self) -> Option<&LocalCache> {
        self.cache.as_ref()
    }

    /// Get the task pool.
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Get the cost analyzer.
    pub fn analyzer(&self) -> Arc<dyn CostAnalyzer> {
        self.analyzer.clone()
    }

    /// Get the listing filter.
    pub fn filter(&self) -> &ResourceFilter {
        &self.filter
    }

    /// List a directory, hiding excluded children.
    pub async fn list_visible(
        &self,
        directory: &Resource,
        visibility: &[Visibility],
        sort: SortPolicy,
    ) -> Result<Vec<Resource>> {
        let children = self
            .resources
            .list_directory(directory, visibility, sort)
            .await?;
        Ok(self.filter.retain(children))
    }

    /// Delete a resource's metadata, content and cached copies in the background.
    ///
    /// Metadata goes first so the reaper can finish the content if the
    /// object delete fails. The returned handle may be awaited for the
    /// outcome or dropped.
    pub fn delete_everywhere(&self, resource: Resource) -> Result<TaskHandle<()>> {
        let resources = self.resources.clone();
        let blobs = self.blobs.clone();
        let cache = self.cache.clone();
        let name = format!("delete {}", resource.path());
        self.pool.submit(name, async move {
            // Cache entries are keyed by path hash, so collect paths while the records exist
            let cached_paths = match (&cache, resource.is_directory()) {
                (None, _) => Vec::new(),
                (Some(_), false) => vec![resource.path().to_string()],
                (Some(_), true) => resources
                    .list_descendants(&resource)
                    .await?
                    .into_iter()
                    .filter(Resource::is_file)
                    .map(|r| r.path().to_string())
                    .collect(),
            };

            resources.delete_resource(&resource).await?;
            blobs.delete_resource(&resource).await?;
            if let Some(cache) = cache {
                for path in &cached_paths {
                    cache.delete_path_from_cache(path).await?;
                }
            }
            Ok(())
        })
    }

    /// Build a sizer from the current config.
    pub fn sizer(&self) -> Sizer {
        Sizer::new(
            self.resources.clone(),
            self.blobs.clone(),
            self.analyzer(),
            self.config.sizer.backoff(),
        )
    }

    /// Build a reaper from the current config.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.resources.clone(),
            self.blobs.clone(),
            self.config.reaper.backoff(),
            self.config.reaper.iteration_throttle(),
        )
    }

    /// Run each enabled job flagged to run at startup.
    pub async fn run_startup_jobs(&self) {
        if self.config.sizer.enabled && self.config.sizer.run_on_startup {
            let _ = jobs::run_logged(&self.sizer()).await;
        }
        if self.config.reaper.enabled && self.config.reaper.run_on_startup {
            let _ = jobs::run_logged(&self.reaper()).await;
        }
    }

    /// Spawn interval runners for every scheduled job.
    pub fn spawn_scheduled_jobs(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let sizer: Arc<dyn Job> = Arc::new(self.sizer());
        let reaper: Arc<dyn Job> = Arc::new(self.reaper());
        let scheduled = [
            (self.config.sizer.interval(), sizer),
            (self.config.reaper.interval(), reaper),
        ];
        for (interval, job) in scheduled {
            match interval {
                Some(period) => handles.push(jobs::start_job_runner(job, period)),
                None => info!("Job {} is not scheduled", job.name()),
            }
        }

        handles
    }

    /// Stop accepting pooled work and wait for running tasks.
    pub async fn shutdown(&self) {
        let pending = self.pool.pending_tasks();
        if pending > 0 {
            warn!("Waiting for {} background task(s) to finish", pending);
        }
        self.pool.shutdown().await;
        self.db.close().await;
        info!("Cairn stopped");
    }
}
