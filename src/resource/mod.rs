//! Resource model for Cairn.
//!
//! A [`Resource`] is a node of the emulated filesystem: either a directory
//! or a file. Its `path` is the primary key, and its `parent` is derived
//! from the path once at construction and never changes afterwards.

pub mod path;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{CairnError, Result};

pub use path::{
    child_key_prefix, child_prefix, name_of, normalize_path, object_key, parent_of,
    split_path_elements, validate_path, PathElement, ROOT_PATH,
};

/// Kind of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// A directory that may contain other resources.
    Directory,
    /// A file whose bytes live in the object store.
    File,
}

impl ResourceType {
    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Directory => "DIRECTORY",
            ResourceType::File => "FILE",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DIRECTORY" => Ok(ResourceType::Directory),
            "FILE" => Ok(ResourceType::File),
            _ => Err(format!("unknown resource type: {s}")),
        }
    }
}

/// Who may see a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// Visible to anyone.
    Public,
    /// Visible to the owner only.
    #[default]
    Private,
}

impl Visibility {
    /// Both visibilities, for callers that want everything.
    pub const ALL: [Visibility; 2] = [Visibility::Public, Visibility::Private];

    /// Convert to the stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Private => "PRIVATE",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PUBLIC" => Ok(Visibility::Public),
            "PRIVATE" => Ok(Visibility::Private),
            _ => Err(format!("unknown visibility: {s}")),
        }
    }
}

/// Data for creating a new resource.
///
/// Nothing is checked until [`Resource::new`] is called.
#[derive(Debug, Clone)]
pub struct NewResource {
    /// Absolute, normalized path.
    pub path: String,
    /// Directory or file.
    pub resource_type: ResourceType,
    /// Owner identity.
    pub owner: String,
    /// Size in bytes.
    pub size: i64,
    /// Free-text description.
    pub description: String,
    /// Visibility.
    pub visibility: Visibility,
    /// Favorite flag.
    pub favorite: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl NewResource {
    /// Describe a new directory, created now.
    pub fn directory(path: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_type: ResourceType::Directory,
            owner: owner.into(),
            size: 0,
            description: String::new(),
            visibility: Visibility::default(),
            favorite: false,
            created_at: Utc::now(),
        }
    }

    /// Describe a new file of the given size, created now.
    pub fn file(path: impl Into<String>, owner: impl Into<String>, size: i64) -> Self {
        Self {
            size,
            resource_type: ResourceType::File,
            ..Self::directory(path, owner)
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Set the favorite flag.
    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A file or directory node in the emulated tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    path: String,
    parent: String,
    size: i64,
    description: String,
    #[serde(rename = "type")]
    resource_type: ResourceType,
    visibility: Visibility,
    owner: String,
    created_at: DateTime<Utc>,
    last_accessed_at: Option<DateTime<Utc>>,
    favorite: bool,
    cost: Decimal,
}

impl Resource {
    /// Validate a [`NewResource`] and build the resource from it.
    ///
    /// The parent is derived from the path.
    pub fn new(new: NewResource) -> Result<Self> {
        validate_path(&new.path)?;
        if new.size < 0 {
            return Err(CairnError::InvalidArgument(format!(
                "resource size must be >= 0: {}",
                new.size
            )));
        }
        if new.owner.is_empty() {
            return Err(CairnError::InvalidArgument(
                "resource owner cannot be empty".to_string(),
            ));
        }

        let parent = parent_of(&new.path).to_string();

        Ok(Self {
            path: new.path,
            parent,
            size: new.size,
            description: new.description,
            resource_type: new.resource_type,
            visibility: new.visibility,
            owner: new.owner,
            created_at: new.created_at,
            last_accessed_at: None,
            favorite: new.favorite,
            cost: Decimal::ZERO,
        })
    }

    /// Build a new private directory created now.
    pub fn new_directory(path: impl Into<String>, owner: impl Into<String>) -> Result<Self> {
        Self::new(NewResource::directory(path, owner))
    }

    /// Build a new private file created now.
    pub fn new_file(path: impl Into<String>, owner: impl Into<String>, size: i64) -> Result<Self> {
        Self::new(NewResource::file(path, owner, size))
    }

    /// Absolute path (primary key).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the containing directory.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Size in bytes (aggregate size for directories once sized).
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Free-text description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Directory or file.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Owner identity.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last read access, if any has been recorded.
    pub fn last_accessed_at(&self) -> Option<DateTime<Utc>> {
        self.last_accessed_at
    }

    /// Favorite flag.
    pub fn favorite(&self) -> bool {
        self.favorite
    }

    /// Estimated monthly storage cost.
    pub fn cost(&self) -> Decimal {
        self.cost
    }

    /// Whether this is a directory.
    pub fn is_directory(&self) -> bool {
        self.resource_type == ResourceType::Directory
    }

    /// Whether this is a file.
    pub fn is_file(&self) -> bool {
        self.resource_type == ResourceType::File
    }

    /// Last path segment, e.g. `baz` for `/foo/bar/baz`.
    pub fn name(&self) -> &str {
        name_of(&self.path)
    }

    /// Lowercased file extension of the name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(name[idx + 1..].to_lowercase()),
        }
    }

    /// Object store key for this resource.
    pub fn object_key(&self) -> &str {
        object_key(&self.path)
    }

    /// Set the description.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Set the visibility.
    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// Set the favorite flag.
    pub fn set_favorite(&mut self, favorite: bool) {
        self.favorite = favorite;
    }

    /// Set the size in bytes.
    pub fn set_size(&mut self, size: i64) -> Result<()> {
        if size < 0 {
            return Err(CairnError::InvalidArgument(format!(
                "resource size must be >= 0: {size}"
            )));
        }
        self.size = size;
        Ok(())
    }

    /// Set the estimated monthly cost.
    pub fn set_cost(&mut self, cost: Decimal) {
        self.cost = cost;
    }

    /// Record a read access.
    pub fn set_last_accessed_at(&mut self, at: Option<DateTime<Utc>>) {
        self.last_accessed_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_directory_derives_parent() {
        let dir = Resource::new(NewResource::directory("/alice/photos", "alice")).unwrap();

        assert_eq!(dir.path(), "/alice/photos");
        assert_eq!(dir.parent(), "/alice");
        assert_eq!(dir.size(), 0);
        assert_eq!(dir.resource_type(), ResourceType::Directory);
        assert_eq!(dir.visibility(), Visibility::Private);
        assert!(!dir.favorite());
        assert!(dir.last_accessed_at().is_none());
        assert_eq!(dir.cost(), Decimal::ZERO);
    }

    #[test]
    fn test_top_level_parent_is_root() {
        let home = Resource::new(NewResource::directory("/alice", "alice")).unwrap();
        assert_eq!(home.parent(), "/");
    }

    #[test]
    fn test_new_file() {
        let file = Resource::new(
            NewResource::file("/alice/notes.TXT", "alice", 42)
                .with_description("notes")
                .with_visibility(Visibility::Public)
                .with_favorite(true),
        )
        .unwrap();

        assert!(file.is_file());
        assert_eq!(file.size(), 42);
        assert_eq!(file.description(), "notes");
        assert_eq!(file.visibility(), Visibility::Public);
        assert!(file.favorite());
        assert_eq!(file.name(), "notes.TXT");
        assert_eq!(file.extension(), Some("txt".to_string()));
        assert_eq!(file.object_key(), "alice/notes.TXT");
    }

    #[test]
    fn test_rejects_relative_path() {
        let result = Resource::new(NewResource::directory("alice", "alice"));
        assert!(matches!(result, Err(CairnError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_negative_size() {
        let result = Resource::new(NewResource::file("/a/b", "alice", -1));
        assert!(matches!(result, Err(CairnError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_empty_owner() {
        let result = Resource::new(NewResource::directory("/a", ""));
        assert!(matches!(result, Err(CairnError::InvalidArgument(_))));
    }

    #[test]
    fn test_set_size_rejects_negative() {
        let mut file = Resource::new(NewResource::file("/a/b", "alice", 1)).unwrap();
        assert!(file.set_size(-5).is_err());
        assert_eq!(file.size(), 1);
        file.set_size(10).unwrap();
        assert_eq!(file.size(), 10);
    }

    #[test]
    fn test_shorthand_constructors() {
        let dir = Resource::new_directory("/alice", "alice").unwrap();
        assert!(dir.is_directory());

        let file = Resource::new_file("/alice/a.bin", "alice", 7).unwrap();
        assert!(file.is_file());
        assert_eq!(file.parent(), "/alice");

        assert!(Resource::new_file("/alice/", "alice", 7).is_err());
    }

    #[test]
    fn test_extension_edge_cases() {
        let hidden = Resource::new(NewResource::file("/a/.hidden", "alice", 0)).unwrap();
        assert_eq!(hidden.extension(), None);

        let plain = Resource::new(NewResource::file("/a/README", "alice", 0)).unwrap();
        assert_eq!(plain.extension(), None);

        let archive = Resource::new(NewResource::file("/a/x.tar.GZ", "alice", 0)).unwrap();
        assert_eq!(archive.extension(), Some("gz".to_string()));
    }

    #[test]
    fn test_type_and_visibility_parse() {
        assert_eq!("directory".parse::<ResourceType>(), Ok(ResourceType::Directory));
        assert_eq!("FILE".parse::<ResourceType>(), Ok(ResourceType::File));
        assert!("link".parse::<ResourceType>().is_err());

        assert_eq!("public".parse::<Visibility>(), Ok(Visibility::Public));
        assert_eq!(Visibility::Private.to_string(), "PRIVATE");
        assert!("secret".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_serialize_json_shape() {
        let file = Resource::new(NewResource::file("/a/b.txt", "alice", 3)).unwrap();
        let json = serde_json::to_value(&file).unwrap();

        assert_eq!(json["path"], "/a/b.txt");
        assert_eq!(json["parent"], "/a");
        assert_eq!(json["type"], "FILE");
        assert_eq!(json["visibility"], "PRIVATE");
        assert!(json["lastAccessedAt"].is_null());
    }
}
