//! SQLite metadata backend.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{ChildFilter, MetadataStore};
use crate::db::Database;
use crate::resource::{NewResource, Resource, ResourceType, Visibility};
use crate::{CairnError, Result};

const COLUMNS: &str = "path, parent, size, description, resource_type, visibility, owner, \
                       created_at, last_accessed_at, favorite, cost";

/// Database row for a resource.
#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    path: String,
    #[allow(dead_code)]
    parent: String,
    size: i64,
    description: String,
    resource_type: String,
    visibility: String,
    owner: String,
    created_at: String,
    last_accessed_at: Option<String>,
    favorite: bool,
    cost: String,
}

impl ResourceRow {
    fn into_resource(self) -> Result<Resource> {
        let resource_type =
            ResourceType::from_str(&self.resource_type).map_err(CairnError::Validation)?;
        let visibility = Visibility::from_str(&self.visibility).map_err(CairnError::Validation)?;
        let created_at = parse_timestamp(&self.created_at)?;
        let last_accessed_at = self
            .last_accessed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        let cost = Decimal::from_str(&self.cost)
            .map_err(|e| CairnError::Validation(format!("invalid cost '{}': {}", self.cost, e)))?;

        let mut resource = Resource::new(NewResource {
            path: self.path,
            resource_type,
            owner: self.owner,
            size: self.size,
            description: self.description,
            visibility,
            favorite: self.favorite,
            created_at,
        })?;
        resource.set_last_accessed_at(last_accessed_at);
        resource.set_cost(cost);
        Ok(resource)
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CairnError::Validation(format!("invalid timestamp '{s}': {e}")))
}

fn into_resources(rows: Vec<ResourceRow>) -> Result<Vec<Resource>> {
    rows.into_iter().map(ResourceRow::into_resource).collect()
}

/// Smallest string greater than every string starting with `prefix`.
///
/// `None` when no such bound exists, i.e. for an empty prefix.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = (last as u32 + 1..=char::MAX as u32).find_map(char::from_u32);
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Metadata store backed by the `resources` table.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Create a store over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a store sharing the database's pool.
    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, path: &str) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {COLUMNS} FROM resources WHERE path = ?"
        ))
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CairnError::Database(e.to_string()))?;

        into_resources(rows)
    }

    async fn put(&self, resource: &Resource) -> Result<()> {
        sqlx::query(
            "INSERT INTO resources (path, parent, size, description, resource_type, visibility,
                                    owner, created_at, last_accessed_at, favorite, cost)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                description = excluded.description,
                visibility = excluded.visibility,
                last_accessed_at = excluded.last_accessed_at,
                favorite = excluded.favorite,
                cost = excluded.cost",
        )
        .bind(resource.path())
        .bind(resource.parent())
        .bind(resource.size())
        .bind(resource.description())
        .bind(resource.resource_type().as_str())
        .bind(resource.visibility().as_str())
        .bind(resource.owner())
        .bind(format_timestamp(resource.created_at()))
        .bind(resource.last_accessed_at().map(format_timestamp))
        .bind(resource.favorite())
        .bind(resource.cost().to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| CairnError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM resources WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| CairnError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_by_parent(&self, parent: &str, filter: &ChildFilter) -> Result<Vec<Resource>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM resources WHERE parent = "));
        query.push_bind(parent.to_string());

        if let Some(ref visibility) = filter.visibility {
            if visibility.is_empty() {
                return Ok(Vec::new());
            }
            query.push(" AND visibility IN (");
            let mut separated = query.separated(", ");
            for v in visibility {
                separated.push_bind(v.as_str());
            }
            separated.push_unseparated(")");
        }

        if let Some(resource_type) = filter.resource_type {
            query.push(" AND resource_type = ");
            query.push_bind(resource_type.as_str());
        }

        query.push(" ORDER BY path");

        let rows = query
            .build_query_as::<ResourceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CairnError::Database(e.to_string()))?;

        into_resources(rows)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Resource>> {
        // TEXT compares bytewise, so [prefix, successor) is exactly the
        // paths starting with prefix and the primary key index serves it
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM resources WHERE path >= "));
        query.push_bind(prefix);
        if let Some(upper) = prefix_successor(prefix) {
            query.push(" AND path < ").push_bind(upper);
        }
        query.push(" ORDER BY path");

        let rows = query
            .build_query_as::<ResourceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CairnError::Database(e.to_string()))?;

        into_resources(rows)
    }

    async fn scan_all(&self) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {COLUMNS} FROM resources ORDER BY path"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CairnError::Database(e.to_string()))?;

        into_resources(rows)
    }
}
