//! dagstore Core - Document model, errors, and store traits
//!
//! This crate defines the abstractions shared by every dagstore crate:
//! - Error taxonomy with stable numeric codes
//! - Document references and metadata (vertex and edge documents)
//! - The typed query model handed to stores
//! - Lazy result cursors
//! - The `DocumentStore` trait implemented by store backends
//! - Configuration management

pub mod config;
pub mod cursor;
pub mod query;

pub use config::{ConfigError, DagConfig, GraphConfig, LoggingConfig, StoreConfig};
pub use cursor::Cursor;
pub use query::{Direction, Query, Traversal, TraversalOrder, Uniqueness, MAX_DEPTH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Stable numeric codes for programmatic matching of [`DagError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    VertexNil = 1101,
    EmptyKey = 1201,
    DuplicateKey = 1202,
    NotFound = 1203,
    DuplicateEdge = 1301,
    Loop = 1302,
    Store = 1401,
    Serialization = 1402,
    InvalidName = 1501,
    Config = 1601,
}

impl ErrorCode {
    /// Numeric value of the code
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Errors raised by dagstore operations
#[derive(Error, Debug)]
pub enum DagError {
    #[error("don't know what to do with an empty vertex")]
    VertexNil,

    #[error("key is empty")]
    EmptyKey,

    #[error("'{0}' is already known")]
    DuplicateKey(String),

    #[error("vertex '{0}' is unknown")]
    VertexNotFound(String),

    #[error("an edge from '{src}' to '{dst}' doesn't exist")]
    EdgeNotFound { src: String, dst: String },

    #[error("an edge from '{src}' to '{dst}' is already known")]
    DuplicateEdge { src: String, dst: String },

    #[error("adding an edge from '{src}' to '{dst}' would create a loop")]
    Loop { src: String, dst: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid document id: {0}")]
    InvalidDocumentId(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagError {
    /// The stable code of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::VertexNil => ErrorCode::VertexNil,
            Self::EmptyKey => ErrorCode::EmptyKey,
            Self::DuplicateKey(_) => ErrorCode::DuplicateKey,
            Self::VertexNotFound(_) | Self::EdgeNotFound { .. } => ErrorCode::NotFound,
            Self::DuplicateEdge { .. } => ErrorCode::DuplicateEdge,
            Self::Loop { .. } => ErrorCode::Loop,
            Self::Store(_) | Self::Other(_) => ErrorCode::Store,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::InvalidName(_) | Self::InvalidDocumentId(_) => ErrorCode::InvalidName,
            Self::Config(_) => ErrorCode::Config,
        }
    }

    /// True for missing vertices and missing edges
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

pub type Result<T> = std::result::Result<T, DagError>;

/// Classification of collaborator failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Document, collection or database is absent
    NotFound,
    /// A key or unique index constraint was violated
    Conflict,
    /// The store rejected the query
    InvalidQuery,
    /// Transport or authentication failure
    Connection,
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Conflict => write!(f, "conflict"),
            Self::InvalidQuery => write!(f, "invalid query"),
            Self::Connection => write!(f, "connection"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured error reported by a [`DocumentStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Conflict, message)
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::InvalidQuery, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == StoreErrorKind::Conflict
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Document Model
// ============================================================================

/// Globally unique reference to a document: collection name plus key.
///
/// Rendered and parsed as `collection/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId {
    collection: String,
    key: String,
}

impl DocumentId {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

impl FromStr for DocumentId {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((collection, key)) if !collection.is_empty() && !key.is_empty() => {
                Ok(Self::new(collection, key))
            }
            _ => Err(DagError::InvalidDocumentId(s.to_string())),
        }
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DagError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.to_string()
    }
}

/// Identity of a stored document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(rename = "_key")]
    pub key: String,
}

impl From<DocumentId> for DocumentMeta {
    fn from(id: DocumentId) -> Self {
        Self {
            key: id.key().to_string(),
            id,
        }
    }
}

/// Kind of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Plain documents (vertices)
    Document,
    /// Documents carrying `_from` and `_to` references (edges)
    Edge,
}

/// Handle on a collection inside a database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    pub database: String,
    pub name: String,
    pub kind: CollectionKind,
}

impl CollectionRef {
    pub fn new(database: impl Into<String>, name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            kind,
        }
    }

    /// Reference to the document with the given key in this collection
    pub fn document_id(&self, key: impl Into<String>) -> DocumentId {
        DocumentId::new(self.name.clone(), key)
    }
}

/// Check a database or collection name: ASCII letters, digits and `_`,
/// not starting with a digit.
pub fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Capability for payloads that carry their own vertex key.
///
/// Payloads implementing this trait are stored under the returned key
/// instead of a store-generated one.
pub trait KeyProvider {
    fn key(&self) -> &str;
}

// ============================================================================
// Traits
// ============================================================================

/// Document/graph store collaborator.
///
/// Implementations provide database and collection provisioning, single
/// document CRUD, typed query execution returning lazy cursors, and unique
/// index management. Documents are JSON objects; stores derive `_id` from
/// the collection name and `_key`, and generate `_key` when it is absent.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check whether a database exists
    async fn database_exists(&self, database: &str) -> StoreResult<bool>;

    /// Create a database
    async fn create_database(&self, database: &str) -> StoreResult<()>;

    /// Check whether a collection exists in a database
    async fn collection_exists(&self, database: &str, name: &str) -> StoreResult<bool>;

    /// Create a collection of the given kind
    async fn create_collection(
        &self,
        database: &str,
        name: &str,
        kind: CollectionKind,
    ) -> StoreResult<CollectionRef>;

    /// Ensure a unique index over the given fields exists
    async fn ensure_unique_index(&self, collection: &CollectionRef, fields: &[&str])
        -> StoreResult<()>;

    /// Insert a document, failing with a conflict on duplicate keys or
    /// unique index violations
    async fn create_document(
        &self,
        collection: &CollectionRef,
        document: serde_json::Value,
    ) -> StoreResult<DocumentMeta>;

    /// Read the document with the given key
    async fn read_document(
        &self,
        collection: &CollectionRef,
        key: &str,
    ) -> StoreResult<serde_json::Value>;

    /// Merge the given object into the stored document
    async fn update_document(
        &self,
        collection: &CollectionRef,
        key: &str,
        patch: serde_json::Value,
    ) -> StoreResult<DocumentMeta>;

    /// Replace the stored document, keeping its system fields
    async fn replace_document(
        &self,
        collection: &CollectionRef,
        key: &str,
        document: serde_json::Value,
    ) -> StoreResult<DocumentMeta>;

    /// Remove the document with the given key
    async fn remove_document(&self, collection: &CollectionRef, key: &str)
        -> StoreResult<DocumentMeta>;

    /// Number of documents in a collection
    async fn count(&self, collection: &CollectionRef) -> StoreResult<u64>;

    /// Execute a query and return a cursor over its results
    async fn query(&self, database: &str, query: &Query) -> StoreResult<Cursor>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_roundtrip() {
        let id = DocumentId::new("v_tasks", "42");
        assert_eq!(id.to_string(), "v_tasks/42");
        assert_eq!("v_tasks/42".parse::<DocumentId>().unwrap(), id);
    }

    #[test]
    fn test_document_id_rejects_malformed() {
        assert!("no-slash".parse::<DocumentId>().is_err());
        assert!("/key".parse::<DocumentId>().is_err());
        assert!("coll/".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_document_meta_serde_shape() {
        let meta = DocumentMeta::from(DocumentId::new("v_g", "a"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"_id": "v_g/a", "_key": "a"}));

        let back: DocumentMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(DagError::VertexNil.code().as_u16(), 1101);
        assert_eq!(DagError::EmptyKey.code().as_u16(), 1201);
        assert_eq!(DagError::DuplicateKey("a".into()).code().as_u16(), 1202);
        assert_eq!(DagError::VertexNotFound("a".into()).code().as_u16(), 1203);
        let loop_err = DagError::Loop {
            src: "1".into(),
            dst: "0".into(),
        };
        assert_eq!(loop_err.code(), ErrorCode::Loop);
        assert_eq!(
            DagError::from(StoreError::connection("refused")).code(),
            ErrorCode::Store
        );
    }

    #[test]
    fn test_not_found_covers_vertices_and_edges() {
        assert!(DagError::VertexNotFound("x".into()).is_not_found());
        assert!(DagError::EdgeNotFound {
            src: "a".into(),
            dst: "b".into()
        }
        .is_not_found());
        assert!(!DagError::EmptyKey.is_not_found());
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("v_tasks"));
        assert!(valid_name("_private"));
        assert!(!valid_name(""));
        assert!(!valid_name("1abc"));
        assert!(!valid_name("v-tasks"));
        assert!(!valid_name("drop table;"));
    }

    #[test]
    fn test_collection_ref_document_id() {
        let vertices = CollectionRef::new("db", "v_g", CollectionKind::Document);
        assert_eq!(vertices.document_id("7").to_string(), "v_g/7");
    }
}
