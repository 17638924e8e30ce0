//! Database schema and migrations for Cairn.
//!
//! Migrations are applied in order when the database is opened. The
//! schema_version table records which ones have already run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: resource metadata, keyed by path with a secondary index on parent
    r#"
CREATE TABLE resources (
    path              TEXT PRIMARY KEY NOT NULL,
    parent            TEXT NOT NULL,
    size              INTEGER NOT NULL DEFAULT 0,
    description       TEXT NOT NULL DEFAULT '',
    resource_type     TEXT NOT NULL,              -- 'DIRECTORY' or 'FILE'
    visibility        TEXT NOT NULL DEFAULT 'PRIVATE',
    owner             TEXT NOT NULL,
    created_at        TEXT NOT NULL,              -- RFC3339
    last_accessed_at  TEXT,                       -- RFC3339, NULL until first read
    favorite          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX idx_resources_parent ON resources(parent);
"#,
    // v2: cost estimate maintained by the sizer
    r#"
ALTER TABLE resources ADD COLUMN cost TEXT NOT NULL DEFAULT '0';
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert!(!MIGRATIONS.is_empty());
    }

    #[test]
    fn test_first_migration_creates_resources() {
        let first = MIGRATIONS[0];
        assert!(first.contains("CREATE TABLE resources"));
        assert!(first.contains("path"));
        assert!(first.contains("parent"));
        assert!(first.contains("idx_resources_parent"));
    }

    #[test]
    fn test_cost_column_added() {
        assert!(MIGRATIONS.iter().any(|m| m.contains("ADD COLUMN cost")));
    }
}
