//! Edge documents: checked insertion and removal

use crate::dag::{require_key, Dag};
use dagstore_core::{Cursor, DagError, DocumentId, DocumentMeta, Query, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// An edge read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T = Value> {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(rename = "_key")]
    pub key: String,

    #[serde(rename = "_from")]
    pub from: DocumentId,

    #[serde(rename = "_to")]
    pub to: DocumentId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Options for [`Dag::add_edge_with`]
#[derive(Debug, Clone, Default)]
pub struct EdgeOptions {
    /// Payload stored on the edge
    pub data: Option<Value>,
    /// Create missing endpoints as empty vertices instead of failing
    pub create_vertices: bool,
}

impl EdgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn create_vertices(mut self, create: bool) -> Self {
        self.create_vertices = create;
        self
    }
}

/// Steps of a checked edge insertion, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertStep {
    ResolveEndpoints,
    CheckDuplicate,
    CheckCycle,
    Persist,
}

impl fmt::Display for InsertStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveEndpoints => "resolve_endpoints",
            Self::CheckDuplicate => "check_duplicate",
            Self::CheckCycle => "check_cycle",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

fn edge_document(from: &DocumentId, to: &DocumentId, data: Option<Value>) -> Value {
    let mut document = Map::new();
    document.insert("_from".to_string(), Value::String(from.to_string()));
    document.insert("_to".to_string(), Value::String(to.to_string()));
    if let Some(data) = data.filter(|d| !d.is_null()) {
        document.insert("data".to_string(), data);
    }
    Value::Object(document)
}

impl Dag {
    /// Add an edge from `src` to `dst`.
    ///
    /// Both vertices must exist. Fails with [`DagError::DuplicateEdge`] if the
    /// edge is already known and with [`DagError::Loop`] if it would close a
    /// cycle (self-loops included).
    pub async fn add_edge(&self, src: &str, dst: &str) -> Result<DocumentMeta> {
        self.add_edge_with(src, dst, EdgeOptions::default()).await
    }

    /// Add an edge with a payload and/or implicit vertex creation
    pub async fn add_edge_with(
        &self,
        src: &str,
        dst: &str,
        options: EdgeOptions,
    ) -> Result<DocumentMeta> {
        require_key(src)?;
        require_key(dst)?;

        tracing::debug!(src, dst, step = %InsertStep::ResolveEndpoints, "adding edge");
        let from = self.resolve_endpoint(src, options.create_vertices).await?;
        let to = self.resolve_endpoint(dst, options.create_vertices).await?;

        tracing::debug!(src, dst, step = %InsertStep::CheckDuplicate, "adding edge");
        if self.find_edge(&from, &to).await? {
            return Err(duplicate_edge(src, dst));
        }

        // an edge closes a cycle iff dst already reaches src
        tracing::debug!(src, dst, step = %InsertStep::CheckCycle, "adding edge");
        if self.path_exists(&to, &from).await? {
            return Err(DagError::Loop {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        tracing::debug!(src, dst, step = %InsertStep::Persist, "adding edge");
        self.persist_edge(src, dst, &from, &to, options.data).await
    }

    /// Add an edge without the endpoint, duplicate and cycle checks.
    ///
    /// The unique (from, to) index still applies. Meant for bulk loads of
    /// graphs already known to be acyclic.
    pub async fn add_edge_unchecked(&self, src: &str, dst: &str) -> Result<DocumentMeta> {
        require_key(src)?;
        require_key(dst)?;
        let from = self.vertex_id(src);
        let to = self.vertex_id(dst);
        self.persist_edge(src, dst, &from, &to, None).await
    }

    async fn resolve_endpoint(&self, key: &str, create: bool) -> Result<DocumentId> {
        if let Some(meta) = self.lookup_vertex(key).await? {
            return Ok(meta.id);
        }
        if !create {
            return Err(DagError::VertexNotFound(key.to_string()));
        }

        match self.add_named_vertex::<Value>(key, None).await {
            Ok(meta) => Ok(meta.id),
            // created concurrently by someone else
            Err(DagError::DuplicateKey(_)) => Ok(self.vertex_id(key)),
            Err(err) => Err(err),
        }
    }

    async fn persist_edge(
        &self,
        src: &str,
        dst: &str,
        from: &DocumentId,
        to: &DocumentId,
        data: Option<Value>,
    ) -> Result<DocumentMeta> {
        let document = edge_document(from, to, data);
        self.store()
            .create_document(&self.edges, document)
            .await
            .map_err(|err| {
                if err.is_conflict() {
                    duplicate_edge(src, dst)
                } else {
                    DagError::Store(err)
                }
            })
    }

    async fn find_edge(&self, from: &DocumentId, to: &DocumentId) -> Result<bool> {
        self.exists(Query::FindEdge {
            edges: self.edges.name.clone(),
            from: from.clone(),
            to: to.clone(),
        })
        .await
    }

    /// Read the edge from `src` to `dst`
    pub async fn get_edge<T: DeserializeOwned>(&self, src: &str, dst: &str) -> Result<Edge<T>> {
        require_key(src)?;
        require_key(dst)?;
        let mut cursor = self
            .query(Query::FindEdge {
                edges: self.edges.name.clone(),
                from: self.vertex_id(src),
                to: self.vertex_id(dst),
            })
            .await?;

        cursor.read_document().await?.ok_or_else(|| DagError::EdgeNotFound {
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }

    pub async fn edge_exists(&self, src: &str, dst: &str) -> Result<bool> {
        require_key(src)?;
        require_key(dst)?;
        self.find_edge(&self.vertex_id(src), &self.vertex_id(dst)).await
    }

    /// Remove the edge from `src` to `dst`
    pub async fn del_edge(&self, src: &str, dst: &str) -> Result<DocumentMeta> {
        let edge: Edge = self.get_edge(src, dst).await?;

        let meta = self
            .store()
            .remove_document(&self.edges, &edge.key)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    DagError::EdgeNotFound {
                        src: src.to_string(),
                        dst: dst.to_string(),
                    }
                } else {
                    DagError::Store(err)
                }
            })?;

        tracing::debug!(src, dst, key = %edge.key, "edge removed");
        Ok(meta)
    }

    /// Number of edges (the size of the graph)
    pub async fn size(&self) -> Result<u64> {
        Ok(self.store().count(&self.edges).await?)
    }

    /// Cursor over all edges
    pub async fn all_edges(&self) -> Result<Cursor> {
        self.query(Query::Scan {
            collection: self.edges.name.clone(),
        })
        .await
    }
}

fn duplicate_edge(src: &str, dst: &str) -> DagError {
    DagError::DuplicateEdge {
        src: src.to_string(),
        dst: dst.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edge_document_shape() {
        let from = DocumentId::new("v_g", "1");
        let to = DocumentId::new("v_g", "2");
        assert_eq!(
            edge_document(&from, &to, None),
            json!({"_from": "v_g/1", "_to": "v_g/2"})
        );
        assert_eq!(
            edge_document(&from, &to, Some(json!({"w": 3}))),
            json!({"_from": "v_g/1", "_to": "v_g/2", "data": {"w": 3}})
        );
    }

    #[test]
    fn test_edge_options_builder() {
        let options = EdgeOptions::new()
            .with_data(&json!("label"))
            .unwrap()
            .create_vertices(true);
        assert!(options.create_vertices);
        assert_eq!(options.data, Some(json!("label")));
    }

    #[test]
    fn test_edge_deserializes() {
        let edge: Edge = serde_json::from_value(json!({
            "_id": "e_g/x",
            "_key": "x",
            "_from": "v_g/1",
            "_to": "v_g/2"
        }))
        .unwrap();
        assert_eq!(edge.from.key(), "1");
        assert_eq!(edge.to.key(), "2");
        assert!(edge.data.is_none());
    }

    #[test]
    fn test_edge_payload_without_default() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Weight(u32);

        fn decode<T: DeserializeOwned>(document: Value) -> Edge<T> {
            serde_json::from_value(document).unwrap()
        }

        let edge: Edge<Weight> = decode(json!({
            "_id": "e_g/x",
            "_key": "x",
            "_from": "v_g/1",
            "_to": "v_g/2",
            "data": 4
        }));
        assert_eq!(edge.data, Some(Weight(4)));
    }

    #[test]
    fn test_insert_step_names() {
        assert_eq!(InsertStep::CheckCycle.to_string(), "check_cycle");
        assert_eq!(InsertStep::Persist.to_string(), "persist");
    }
}
