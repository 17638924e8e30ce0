//! Glob-based exclusion of resources.
//!
//! Patterns are matched against the full resource path. `*` also matches
//! `/`, so `*.tmp` hides temporary files at any depth.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::FilterConfig;
use crate::resource::Resource;
use crate::Result;

/// Hides resources whose path matches any configured pattern.
#[derive(Debug, Clone)]
pub struct ResourceFilter {
    patterns: Vec<String>,
    excludes: GlobSet,
}

impl ResourceFilter {
    /// Build a filter from glob patterns.
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(Glob::new(pattern)?);
        }
        let excludes = builder.build()?;

        Ok(Self { patterns, excludes })
    }

    /// Build a filter from configuration.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::new(&config.excludes)
    }

    /// Filter that lets everything through.
    pub fn allow_all() -> Self {
        Self {
            patterns: Vec::new(),
            excludes: GlobSet::empty(),
        }
    }

    /// Configured patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a resource should be shown.
    ///
    /// An absent resource never passes.
    pub fn test(&self, resource: Option<&Resource>) -> bool {
        match resource {
            Some(resource) => !self.is_excluded(resource.path()),
            None => false,
        }
    }

    /// Whether a path matches any exclusion pattern.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excludes.is_match(path)
    }

    /// Keep only the resources that pass.
    pub fn retain(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources
            .into_iter()
            .filter(|r| self.test(Some(r)))
            .collect()
    }
}

impl Default for ResourceFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}
