//! Cairn - hierarchical resource storage
//!
//! Keeps a tree of per-user directories and files as metadata records,
//! with file content held in an object store addressed by path.

pub mod app;
pub mod blob;
pub mod config;
pub mod cost;
pub mod db;
pub mod error;
pub mod filter;
pub mod format;
pub mod jobs;
pub mod logging;
pub mod pool;
pub mod resource;
pub mod retry;
pub mod store;

pub use app::Application;
pub use blob::{
    BlobStore, CacheToken, HttpMethod, LocalCache, LocalObjectStore, MemoryObjectStore, ObjectStore,
    UrlSigner,
};
pub use config::Config;
pub use cost::{CostAnalyzer, StorageTier, StorageTiers, TieredCostAnalyzer};
pub use db::Database;
pub use error::{CairnError, Result};
pub use filter::ResourceFilter;
pub use jobs::{Job, Reaper, ReaperReport, Sizer, TreeNode};
pub use pool::{TaskHandle, TaskPool};
pub use resource::{NewResource, Resource, ResourceType, Visibility};
pub use retry::{call_with_retry, Backoff};
pub use store::{
    Lookup, MemoryMetadataStore, MetadataStore, ResourceStore, SortPolicy, SqliteMetadataStore,
};
