//! dagstore Graph - Directed acyclic graphs on document/graph databases
//!
//! A [`Dag`] is a handle on a vertex collection and an edge collection in a
//! [`DocumentStore`]. It maps DAG operations onto store queries and enforces
//! what the store does not: edges are unique per (from, to) pair and no edge
//! may close a cycle. No graph shape is held in memory; every traversal is
//! answered by the store.
//!
//! Two stores ship with the crate:
//! - [`SurrealDbStore`] talks to a remote SurrealDB over WebSocket
//! - [`MemoryStore`] is an in-process engine for tests and experiments

mod dag;
mod edge;
mod export;
pub mod memory_store;
pub mod surrealdb_store;
mod traversal;
mod vertex;

pub use dag::Dag;
pub use edge::{Edge, EdgeOptions};
pub use export::ExportGraph;
pub use memory_store::MemoryStore;
pub use surrealdb_store::SurrealDbStore;
pub use traversal::TraversalBuilder;
pub use vertex::Vertex;

pub use dagstore_core::{
    CollectionKind, CollectionRef, Cursor, DagError, Direction, DocumentId, DocumentMeta,
    DocumentStore, ErrorCode, KeyProvider, Result, StoreError, TraversalOrder, Uniqueness,
};
