//! The DAG handle and collection provisioning

use dagstore_core::{
    valid_name, CollectionKind, CollectionRef, Cursor, DagError, DocumentId, DocumentStore,
    GraphConfig, Query, Result, MAX_DEPTH,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Handle on a DAG stored in a [`DocumentStore`].
///
/// Cloning is cheap; clones share the store connection and may be used
/// from concurrent tasks.
#[derive(Clone)]
pub struct Dag {
    store: Arc<dyn DocumentStore>,
    pub(crate) vertices: CollectionRef,
    pub(crate) edges: CollectionRef,
    max_depth: u32,
    query_logging: bool,
}

impl Dag {
    /// Open the graph described by `config`, creating whatever is missing
    pub async fn provision(store: Arc<dyn DocumentStore>, config: &GraphConfig) -> Result<Self> {
        let dag = Self::open(
            store,
            &config.database,
            &config.vertex_collection(),
            &config.edge_collection(),
        )
        .await?;

        Ok(dag
            .with_max_depth(config.max_depth)
            .with_query_logging(config.query_logging))
    }

    /// Open a graph, creating the database, the vertex collection and the
    /// edge collection if they don't exist yet.
    ///
    /// The unique (from, to) index on the edge collection is ensured on every
    /// call. Safe to call repeatedly with the same names.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        database: &str,
        vertex_collection: &str,
        edge_collection: &str,
    ) -> Result<Self> {
        for name in [database, vertex_collection, edge_collection] {
            if !valid_name(name) {
                return Err(DagError::InvalidName(name.to_string()));
            }
        }
        if vertex_collection == edge_collection {
            return Err(DagError::InvalidName(format!(
                "vertex and edge collection share the name '{vertex_collection}'"
            )));
        }

        if !store.database_exists(database).await? {
            tracing::debug!(database, "creating database");
            store.create_database(database).await?;
        }

        let vertices =
            ensure_collection(store.as_ref(), database, vertex_collection, CollectionKind::Document)
                .await?;
        let edges =
            ensure_collection(store.as_ref(), database, edge_collection, CollectionKind::Edge)
                .await?;

        // unique edges (from -> to)
        store.ensure_unique_index(&edges, &["_from", "_to"]).await?;

        tracing::info!(
            database,
            vertices = %vertices.name,
            edges = %edges.name,
            "DAG ready"
        );

        Ok(Self {
            store,
            vertices,
            edges,
            max_depth: MAX_DEPTH,
            query_logging: false,
        })
    }

    /// Set the depth bound for ancestor and descendant traversals
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Enable or disable query logging
    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.query_logging = enabled;
        self
    }

    pub fn set_query_logging(&mut self, enabled: bool) {
        self.query_logging = enabled;
    }

    pub fn database(&self) -> &str {
        &self.vertices.database
    }

    pub fn vertex_collection(&self) -> &CollectionRef {
        &self.vertices
    }

    pub fn edge_collection(&self) -> &CollectionRef {
        &self.edges
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn vertex_id(&self, key: &str) -> DocumentId {
        self.vertices.document_id(key)
    }

    /// Run a query against the graph's database
    pub(crate) async fn query(&self, query: Query) -> Result<Cursor> {
        self.log_query(&query);
        Ok(self.store.query(self.database(), &query).await?)
    }

    pub(crate) async fn count(&self, query: Query) -> Result<u64> {
        self.query(query).await?.total().await
    }

    /// True if the query yields at least one document
    pub(crate) async fn exists(&self, query: Query) -> Result<bool> {
        let mut cursor = self.query(query).await?;
        Ok(cursor.next_document().await?.is_some())
    }

    fn log_query(&self, query: &Query) {
        if !self.query_logging {
            return;
        }
        let bind_vars = Value::Object(query.bind_vars());
        tracing::debug!(kind = query.kind(), bind_vars = %bind_vars, "query");
    }
}

async fn ensure_collection(
    store: &dyn DocumentStore,
    database: &str,
    name: &str,
    kind: CollectionKind,
) -> Result<CollectionRef> {
    if store.collection_exists(database, name).await? {
        return Ok(CollectionRef::new(database, name, kind));
    }
    tracing::debug!(database, collection = name, ?kind, "creating collection");
    Ok(store.create_collection(database, name, kind).await?)
}

pub(crate) fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(DagError::EmptyKey);
    }
    Ok(())
}

impl fmt::Debug for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dag")
            .field("vertices", &self.vertices)
            .field("edges", &self.edges)
            .field("max_depth", &self.max_depth)
            .field("query_logging", &self.query_logging)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn store() -> Arc<dyn DocumentStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_open_creates_collections() {
        let memory = MemoryStore::new();
        let dag = Dag::open(Arc::new(memory.clone()), "db", "v_g", "e_g")
            .await
            .unwrap();

        assert_eq!(dag.database(), "db");
        assert_eq!(dag.vertex_collection().kind, CollectionKind::Document);
        assert_eq!(dag.edge_collection().kind, CollectionKind::Edge);
        assert!(memory.database_exists("db").await.unwrap());
        assert!(memory.collection_exists("db", "e_g").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_names() {
        let err = Dag::open(store(), "db", "v-g", "e_g").await.unwrap_err();
        assert!(matches!(err, DagError::InvalidName(_)));

        let err = Dag::open(store(), "db", "same", "same").await.unwrap_err();
        assert!(matches!(err, DagError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_provision_applies_graph_config() {
        let config = GraphConfig {
            database: "builds".to_string(),
            name: "deps".to_string(),
            max_depth: 5,
            query_logging: true,
            ..Default::default()
        };
        let dag = Dag::provision(store(), &config).await.unwrap();

        assert_eq!(dag.vertex_collection().name, "v_deps");
        assert_eq!(dag.edge_collection().name, "e_deps");
        assert_eq!(dag.max_depth(), 5);
        assert!(format!("{dag:?}").contains("query_logging: true"));
    }

    #[test]
    fn test_require_key() {
        assert!(matches!(require_key(""), Err(DagError::EmptyKey)));
        assert!(require_key("a").is_ok());
    }
}
