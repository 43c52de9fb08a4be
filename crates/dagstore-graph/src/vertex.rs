//! Vertex documents: insertion, lookup, update and removal

use crate::dag::{require_key, Dag};
use dagstore_core::{
    Cursor, DagError, DocumentId, DocumentMeta, KeyProvider, Query, Result, StoreError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A vertex read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex<T = Value> {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(rename = "_key")]
    pub key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Serialize a payload, rejecting payloads that serialize to null
fn payload<T: Serialize + ?Sized>(data: &T) -> Result<Value> {
    let value = serde_json::to_value(data)?;
    if value.is_null() {
        return Err(DagError::VertexNil);
    }
    Ok(value)
}

fn vertex_document(key: Option<&str>, data: Option<Value>) -> Value {
    let mut document = Map::new();
    if let Some(key) = key {
        document.insert("_key".to_string(), Value::String(key.to_string()));
    }
    if let Some(data) = data {
        document.insert("data".to_string(), data);
    }
    Value::Object(document)
}

fn data_document(data: Value) -> Value {
    let mut document = Map::new();
    document.insert("data".to_string(), data);
    Value::Object(document)
}

fn vertex_error(err: StoreError, key: &str) -> DagError {
    if err.is_not_found() {
        DagError::VertexNotFound(key.to_string())
    } else {
        DagError::Store(err)
    }
}

impl Dag {
    /// Add a vertex with a store-generated key.
    ///
    /// Payloads serializing to null (`None`, `()`) are rejected with
    /// [`DagError::VertexNil`].
    pub async fn add_vertex<T: Serialize + ?Sized>(&self, data: &T) -> Result<DocumentMeta> {
        let data = payload(data)?;
        self.insert_vertex(None, Some(data)).await
    }

    /// Add a vertex keyed by its payload's [`KeyProvider`] key
    pub async fn add_keyed_vertex<T>(&self, data: &T) -> Result<DocumentMeta>
    where
        T: Serialize + KeyProvider + ?Sized,
    {
        let key = data.key().to_string();
        require_key(&key)?;
        let data = payload(data)?;
        self.insert_vertex(Some(&key), Some(data)).await
    }

    /// Add a vertex under an explicit key. `None` stores an empty vertex.
    pub async fn add_named_vertex<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: Option<&T>,
    ) -> Result<DocumentMeta> {
        require_key(key)?;
        let data = data.map(serde_json::to_value).transpose()?;
        self.insert_vertex(Some(key), data.filter(|d| !d.is_null())).await
    }

    async fn insert_vertex(&self, key: Option<&str>, data: Option<Value>) -> Result<DocumentMeta> {
        let document = vertex_document(key, data);
        self.store()
            .create_document(&self.vertices, document)
            .await
            .map_err(|err| match key {
                Some(key) if err.is_conflict() => DagError::DuplicateKey(key.to_string()),
                _ => DagError::Store(err),
            })
    }

    /// Read the vertex with the given key
    pub async fn get_vertex<T: DeserializeOwned>(&self, key: &str) -> Result<Vertex<T>> {
        require_key(key)?;
        let document = self
            .store()
            .read_document(&self.vertices, key)
            .await
            .map_err(|err| vertex_error(err, key))?;
        Ok(serde_json::from_value(document)?)
    }

    /// Metadata of the vertex with the given key, `None` if it doesn't exist
    pub(crate) async fn lookup_vertex(&self, key: &str) -> Result<Option<DocumentMeta>> {
        match self.store().read_document(&self.vertices, key).await {
            Ok(document) => Ok(Some(serde_json::from_value(document)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn vertex_exists(&self, key: &str) -> Result<bool> {
        require_key(key)?;
        Ok(self.lookup_vertex(key).await?.is_some())
    }

    /// Merge `data` into the payload of the vertex with the given key
    pub async fn update_vertex<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
    ) -> Result<DocumentMeta> {
        require_key(key)?;
        let patch = data_document(payload(data)?);
        self.store()
            .update_document(&self.vertices, key, patch)
            .await
            .map_err(|err| vertex_error(err, key))
    }

    /// Replace the payload of the vertex with the given key
    pub async fn replace_vertex<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
    ) -> Result<DocumentMeta> {
        require_key(key)?;
        let document = data_document(payload(data)?);
        self.store()
            .replace_document(&self.vertices, key, document)
            .await
            .map_err(|err| vertex_error(err, key))
    }

    /// Remove a vertex together with its inbound and outbound edges.
    ///
    /// Returns the number of removed edges. Edges are removed first; if the
    /// vertex removal then fails, the edges stay removed.
    pub async fn del_vertex(&self, key: &str) -> Result<u64> {
        require_key(key)?;
        if self.lookup_vertex(key).await?.is_none() {
            return Err(DagError::VertexNotFound(key.to_string()));
        }

        let removed = self
            .count(Query::RemoveIncidentEdges {
                edges: self.edges.name.clone(),
                vertex: self.vertex_id(key),
            })
            .await?;

        if let Err(err) = self.store().remove_document(&self.vertices, key).await {
            tracing::warn!(
                key,
                removed,
                error = %err,
                "vertex removal failed after its edges were removed"
            );
            return Err(vertex_error(err, key));
        }

        tracing::debug!(key, removed, "vertex removed");
        Ok(removed)
    }

    /// Number of vertices (the order of the graph)
    pub async fn order(&self) -> Result<u64> {
        Ok(self.store().count(&self.vertices).await?)
    }

    /// Cursor over all vertices
    pub async fn all_vertices(&self) -> Result<Cursor> {
        self.query(Query::Scan {
            collection: self.vertices.name.clone(),
        })
        .await
    }
}
