//! In-process document store
//!
//! Keeps databases in memory behind an async `RwLock`. Collections preserve
//! insertion order, which makes traversal order (and therefore shortest-path
//! tie-breaking) deterministic: neighbours are expanded in the order their
//! edges were inserted.
//!
//! Unique indexes and the per-vertex edge lists are maintained on every
//! write, so inserts and neighbour lookups do not scan the collection.

use async_trait::async_trait;
use dagstore_core::{
    CollectionKind, CollectionRef, Cursor, Direction, DocumentId, DocumentMeta, DocumentStore,
    Query, StoreError, StoreResult, Traversal, TraversalOrder, Uniqueness,
};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug)]
struct UniqueIndex {
    fields: Vec<String>,
    /// Indexed values rendered as JSON, mapped to the owning document key
    entries: HashMap<String, String>,
}

impl UniqueIndex {
    fn entry(&self, document: &Value) -> Option<String> {
        let values: Vec<&Value> = self
            .fields
            .iter()
            .map(|field| document.get(field))
            .collect::<Option<_>>()?;
        serde_json::to_string(&values).ok()
    }
}

type Links = HashMap<String, IndexSet<String>>;

#[derive(Debug)]
struct Collection {
    kind: CollectionKind,
    documents: IndexMap<String, Value>,
    unique_indexes: Vec<UniqueIndex>,
    /// Edge keys per `_from` vertex id, in insertion order
    outbound: Links,
    /// Edge keys per `_to` vertex id, in insertion order
    inbound: Links,
}

impl Collection {
    fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            documents: IndexMap::new(),
            unique_indexes: Vec::new(),
            outbound: Links::new(),
            inbound: Links::new(),
        }
    }

    fn ensure_index(&mut self, fields: Vec<String>) -> StoreResult<()> {
        if self.unique_indexes.iter().any(|index| index.fields == fields) {
            return Ok(());
        }
        let mut index = UniqueIndex {
            fields,
            entries: HashMap::new(),
        };
        for (key, document) in &self.documents {
            if let Some(entry) = index.entry(document) {
                if index.entries.insert(entry, key.clone()).is_some() {
                    return Err(StoreError::conflict(format!(
                        "existing documents violate unique index on {:?}",
                        index.fields
                    )));
                }
            }
        }
        self.unique_indexes.push(index);
        Ok(())
    }

    /// First unique index the document would violate if stored under `key`
    fn violated_index(&self, document: &Value, key: &str) -> Option<&[String]> {
        self.unique_indexes
            .iter()
            .find(|index| {
                index
                    .entry(document)
                    .and_then(|entry| index.entries.get(&entry))
                    .is_some_and(|owner| owner != key)
            })
            .map(|index| index.fields.as_slice())
    }

    /// Insert or overwrite a document; an overwritten document keeps its
    /// position
    fn put(&mut self, key: String, document: Value) {
        let previous = self.documents.insert(key.clone(), document.clone());
        if let Some(previous) = &previous {
            self.unindex(&key, previous);
        }
        for index in &mut self.unique_indexes {
            if let Some(entry) = index.entry(&document) {
                index.entries.insert(entry, key.clone());
            }
        }

        if previous.as_ref().map(edge_ends) != Some(edge_ends(&document)) {
            if let Some((from, to)) = previous.as_ref().and_then(edge_ends) {
                self.unlink(&key, from, to);
            }
            if let Some((from, to)) = edge_ends(&document) {
                self.link(&key, from, to);
            }
        }
    }

    fn take(&mut self, key: &str) -> Option<Value> {
        let document = self.documents.shift_remove(key)?;
        self.unindex(key, &document);
        if let Some((from, to)) = edge_ends(&document) {
            self.unlink(key, from, to);
        }
        Some(document)
    }

    fn unindex(&mut self, key: &str, document: &Value) {
        for index in &mut self.unique_indexes {
            if let Some(entry) = index.entry(document) {
                if index.entries.get(&entry).is_some_and(|owner| owner == key) {
                    index.entries.remove(&entry);
                }
            }
        }
    }

    fn link(&mut self, key: &str, from: &str, to: &str) {
        self.outbound
            .entry(from.to_string())
            .or_default()
            .insert(key.to_string());
        self.inbound
            .entry(to.to_string())
            .or_default()
            .insert(key.to_string());
    }

    fn unlink(&mut self, key: &str, from: &str, to: &str) {
        for (links, vertex) in [(&mut self.outbound, from), (&mut self.inbound, to)] {
            if let Some(edges) = links.get_mut(vertex) {
                edges.shift_remove(key);
                if edges.is_empty() {
                    links.remove(vertex);
                }
            }
        }
    }

    fn links(&self, direction: Direction) -> &Links {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }

    /// Keys of the edges touching `vertex` in `direction`
    fn incident(&self, vertex: &str, direction: Direction) -> impl Iterator<Item = &String> {
        self.links(direction).get(vertex).into_iter().flatten()
    }

    /// Vertex ids adjacent to `vertex`, in edge insertion order
    fn neighbours(&self, vertex: &str, direction: Direction) -> Vec<&str> {
        let far = match direction {
            Direction::Outbound => "_to",
            Direction::Inbound => "_from",
        };
        self.incident(vertex, direction)
            .filter_map(|key| self.documents.get(key))
            .filter_map(|edge| edge_end(edge, far))
            .collect()
    }
}

type Database = HashMap<String, Collection>;

/// Document store held entirely in memory.
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    databases: Arc<RwLock<HashMap<String, Database>>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cursors handed out and not yet released
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    fn cursor(&self, documents: Vec<Value>) -> Cursor {
        let open = Arc::clone(&self.open_cursors);
        open.fetch_add(1, Ordering::SeqCst);
        Cursor::from_documents(documents).on_release(move || {
            open.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

fn database<'a>(databases: &'a HashMap<String, Database>, name: &str) -> StoreResult<&'a Database> {
    databases
        .get(name)
        .ok_or_else(|| StoreError::not_found(format!("database '{name}' not found")))
}

fn collection<'a>(database: &'a Database, name: &str) -> StoreResult<&'a Collection> {
    database
        .get(name)
        .ok_or_else(|| StoreError::not_found(format!("collection '{name}' not found")))
}

fn collection_mut<'a>(
    databases: &'a mut HashMap<String, Database>,
    target: &CollectionRef,
) -> StoreResult<&'a mut Collection> {
    databases
        .get_mut(&target.database)
        .ok_or_else(|| StoreError::not_found(format!("database '{}' not found", target.database)))?
        .get_mut(&target.name)
        .ok_or_else(|| StoreError::not_found(format!("collection '{}' not found", target.name)))
}

fn document_not_found(collection: &str, key: &str) -> StoreError {
    StoreError::not_found(format!("document '{collection}/{key}' not found"))
}

fn unique_violation(fields: &[String]) -> StoreError {
    StoreError::conflict(format!("unique constraint violated on {fields:?}"))
}

fn into_object(document: Value) -> StoreResult<Map<String, Value>> {
    match document {
        Value::Object(object) => Ok(object),
        other => Err(StoreError::invalid_query(format!(
            "documents must be objects, got {other}"
        ))),
    }
}

/// Recursive merge of `patch` into `target`
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn strip_system_fields(object: &mut Map<String, Value>) {
    object.remove("_id");
    object.remove("_key");
}

fn edge_end<'a>(edge: &'a Value, field: &str) -> Option<&'a str> {
    edge.get(field).and_then(Value::as_str)
}

fn edge_ends(edge: &Value) -> Option<(&str, &str)> {
    Some((edge_end(edge, "_from")?, edge_end(edge, "_to")?))
}

/// Resolves vertex ids to their documents
struct Vertices<'a> {
    database: &'a Database,
}

impl<'a> Vertices<'a> {
    fn get(&self, id: &str) -> Option<&'a Value> {
        let id: DocumentId = id.parse().ok()?;
        self.database
            .get(id.collection())?
            .documents
            .get(id.key())
    }
}

fn traverse(database: &Database, edges: &Collection, traversal: &Traversal) -> Vec<Value> {
    let vertices = Vertices { database };
    let start = traversal.start.to_string();
    if vertices.get(&start).is_none() || limit_reached(0, traversal.limit) {
        return Vec::new();
    }

    let direction = traversal.direction;
    let ids = match traversal.order {
        TraversalOrder::BreadthFirst => {
            breadth_first(|id| edges.neighbours(id, direction), &start, traversal)
        }
        TraversalOrder::DepthFirst => {
            depth_first(|id| edges.neighbours(id, direction), &start, traversal)
        }
    };

    ids.into_iter()
        .filter_map(|id| vertices.get(id).cloned())
        .collect()
}

fn limit_reached(found: usize, limit: Option<u64>) -> bool {
    limit.is_some_and(|limit| found as u64 >= limit)
}

/// Whether `next` may be yielded again after the vertices on `path`
fn first_visit<'a>(
    uniqueness: Uniqueness,
    visited: &mut HashSet<&'a str>,
    path: &[&'a str],
    next: &'a str,
) -> bool {
    match uniqueness {
        Uniqueness::Global => visited.insert(next),
        Uniqueness::None => !path.contains(&next),
    }
}

/// Level order. With global uniqueness each vertex is yielded once at its
/// shortest distance, otherwise once per path reaching it.
fn breadth_first<'a>(
    neighbours: impl Fn(&'a str) -> Vec<&'a str>,
    start: &'a str,
    traversal: &Traversal,
) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue = VecDeque::from([vec![start]]);

    while let Some(path) = queue.pop_front() {
        let depth = path.len() as u32 - 1;
        let Some(&current) = path.last() else {
            continue;
        };
        if depth >= traversal.max_depth {
            continue;
        }
        for next in neighbours(current) {
            if !first_visit(traversal.uniqueness, &mut visited, &path, next) {
                continue;
            }
            if depth + 1 >= traversal.min_depth {
                found.push(next);
                if limit_reached(found.len(), traversal.limit) {
                    return found;
                }
            }
            let mut extended = path.clone();
            extended.push(next);
            queue.push_back(extended);
        }
    }
    found
}

/// Pre-order. Without uniqueness a vertex is yielded once per path reaching
/// it; a vertex already on the current path is never entered again.
fn depth_first<'a>(
    neighbours: impl Fn(&'a str) -> Vec<&'a str>,
    start: &'a str,
    traversal: &Traversal,
) -> Vec<&'a str> {
    let expand = |vertex: &'a str, depth: u32| -> VecDeque<&'a str> {
        if depth >= traversal.max_depth {
            VecDeque::new()
        } else {
            neighbours(vertex).into()
        }
    };

    let mut found = Vec::new();
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut path = vec![start];
    // unexplored children of every vertex on the path
    let mut pending = vec![expand(start, 0)];

    while let Some(children) = pending.last_mut() {
        let Some(child) = children.pop_front() else {
            pending.pop();
            path.pop();
            continue;
        };
        if !first_visit(traversal.uniqueness, &mut visited, &path, child) {
            continue;
        }
        let depth = path.len() as u32;
        if depth >= traversal.min_depth {
            found.push(child);
            if limit_reached(found.len(), traversal.limit) {
                break;
            }
        }
        path.push(child);
        pending.push(expand(child, depth));
    }
    found
}

fn shortest_path(
    database: &Database,
    edges: &Collection,
    from: &DocumentId,
    to: &DocumentId,
) -> Vec<Value> {
    let vertices = Vertices { database };
    let (from, to) = (from.to_string(), to.to_string());
    let (Some(_), Some(target)) = (vertices.get(&from), vertices.get(&to)) else {
        return Vec::new();
    };
    if from == to {
        return vec![target.clone()];
    }

    let mut parents: HashMap<&str, &str> = HashMap::new();
    let mut queue = VecDeque::from([from.as_str()]);

    while let Some(current) = queue.pop_front() {
        for next in edges.neighbours(current, Direction::Outbound) {
            if next == from || parents.contains_key(next) {
                continue;
            }
            parents.insert(next, current);
            if next == to {
                let mut path = vec![next];
                let mut step = next;
                while let Some(&parent) = parents.get(step) {
                    path.push(parent);
                    step = parent;
                }
                path.reverse();
                return path
                    .into_iter()
                    .filter_map(|id| vertices.get(id).cloned())
                    .collect();
            }
            queue.push_back(next);
        }
    }
    Vec::new()
}

/// Vertices with no neighbour in `direction`
fn unlinked(vertices: &Collection, edges: &Collection, direction: Direction) -> Vec<Value> {
    let links = edges.links(direction);
    vertices
        .documents
        .values()
        .filter(|vertex| {
            vertex
                .get("_id")
                .and_then(Value::as_str)
                .map_or(true, |id| !links.contains_key(id))
        })
        .cloned()
        .collect()
}

fn find_edge(edges: &Collection, from: &DocumentId, to: &DocumentId) -> Vec<Value> {
    let (from, to) = (from.to_string(), to.to_string());
    edges
        .incident(&from, Direction::Outbound)
        .filter_map(|key| edges.documents.get(key))
        .find(|edge| edge_end(edge, "_to") == Some(to.as_str()))
        .cloned()
        .into_iter()
        .collect()
}

/// Remove every edge touching `vertex`, in insertion order
fn remove_incident(edges: &mut Collection, vertex: &str) -> Vec<Value> {
    let view: &Collection = edges;
    let mut keys: Vec<String> = [Direction::Outbound, Direction::Inbound]
        .into_iter()
        .flat_map(|direction| view.incident(vertex, direction))
        .cloned()
        .collect();
    keys.sort_by_key(|key| view.documents.get_index_of(key));
    keys.dedup();
    keys.iter().filter_map(|key| edges.take(key)).collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn database_exists(&self, database: &str) -> StoreResult<bool> {
        Ok(self.databases.read().await.contains_key(database))
    }

    async fn create_database(&self, database: &str) -> StoreResult<()> {
        let mut databases = self.databases.write().await;
        if databases.contains_key(database) {
            return Err(StoreError::conflict(format!(
                "database '{database}' already exists"
            )));
        }
        databases.insert(database.to_string(), Database::new());
        Ok(())
    }

    async fn collection_exists(&self, database: &str, name: &str) -> StoreResult<bool> {
        let databases = self.databases.read().await;
        Ok(self::database(&databases, database)?.contains_key(name))
    }

    async fn create_collection(
        &self,
        database: &str,
        name: &str,
        kind: CollectionKind,
    ) -> StoreResult<CollectionRef> {
        let mut databases = self.databases.write().await;
        let collections = databases
            .get_mut(database)
            .ok_or_else(|| StoreError::not_found(format!("database '{database}' not found")))?;
        if collections.contains_key(name) {
            return Err(StoreError::conflict(format!(
                "collection '{name}' already exists"
            )));
        }
        collections.insert(name.to_string(), Collection::new(kind));
        Ok(CollectionRef::new(database, name, kind))
    }

    async fn ensure_unique_index(
        &self,
        target: &CollectionRef,
        fields: &[&str],
    ) -> StoreResult<()> {
        let mut databases = self.databases.write().await;
        let collection = collection_mut(&mut databases, target)?;
        collection.ensure_index(fields.iter().map(|f| f.to_string()).collect())
    }

    async fn create_document(
        &self,
        target: &CollectionRef,
        document: Value,
    ) -> StoreResult<DocumentMeta> {
        let mut object = into_object(document)?;
        let key = match object.get("_key").and_then(Value::as_str) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => Uuid::new_v4().simple().to_string(),
        };
        let id = DocumentId::new(target.name.clone(), key.clone());
        object.insert("_key".to_string(), Value::String(key.clone()));
        object.insert("_id".to_string(), Value::String(id.to_string()));
        let document = Value::Object(object);

        let mut databases = self.databases.write().await;
        let collection = collection_mut(&mut databases, target)?;

        if collection.kind == CollectionKind::Edge
            && (edge_end(&document, "_from").is_none() || edge_end(&document, "_to").is_none())
        {
            return Err(StoreError::invalid_query(
                "edge documents need _from and _to",
            ));
        }
        if collection.documents.contains_key(&key) {
            return Err(StoreError::conflict(format!(
                "unique constraint violated: key '{key}' already exists"
            )));
        }
        if let Some(fields) = collection.violated_index(&document, &key) {
            return Err(unique_violation(fields));
        }

        collection.put(key, document);
        Ok(DocumentMeta::from(id))
    }

    async fn read_document(&self, target: &CollectionRef, key: &str) -> StoreResult<Value> {
        let databases = self.databases.read().await;
        let collection = self::collection(database(&databases, &target.database)?, &target.name)?;
        collection
            .documents
            .get(key)
            .cloned()
            .ok_or_else(|| document_not_found(&target.name, key))
    }

    async fn update_document(
        &self,
        target: &CollectionRef,
        key: &str,
        patch: Value,
    ) -> StoreResult<DocumentMeta> {
        let mut patch = into_object(patch)?;
        strip_system_fields(&mut patch);

        let mut databases = self.databases.write().await;
        let collection = collection_mut(&mut databases, target)?;
        let mut updated = collection
            .documents
            .get(key)
            .cloned()
            .ok_or_else(|| document_not_found(&target.name, key))?;
        merge(&mut updated, Value::Object(patch));

        if let Some(fields) = collection.violated_index(&updated, key) {
            return Err(unique_violation(fields));
        }
        collection.put(key.to_string(), updated);
        Ok(DocumentMeta::from(target.document_id(key)))
    }

    async fn replace_document(
        &self,
        target: &CollectionRef,
        key: &str,
        document: Value,
    ) -> StoreResult<DocumentMeta> {
        let mut replacement = into_object(document)?;
        strip_system_fields(&mut replacement);

        let mut databases = self.databases.write().await;
        let collection = collection_mut(&mut databases, target)?;
        let existing = collection
            .documents
            .get(key)
            .ok_or_else(|| document_not_found(&target.name, key))?;

        // system fields survive a replace
        for field in ["_key", "_id", "_from", "_to"] {
            if let Some(value) = existing.get(field) {
                replacement
                    .entry(field.to_string())
                    .or_insert_with(|| value.clone());
            }
        }
        let replacement = Value::Object(replacement);

        if let Some(fields) = collection.violated_index(&replacement, key) {
            return Err(unique_violation(fields));
        }
        collection.put(key.to_string(), replacement);
        Ok(DocumentMeta::from(target.document_id(key)))
    }

    async fn remove_document(
        &self,
        target: &CollectionRef,
        key: &str,
    ) -> StoreResult<DocumentMeta> {
        let mut databases = self.databases.write().await;
        let collection = collection_mut(&mut databases, target)?;
        collection
            .take(key)
            .ok_or_else(|| document_not_found(&target.name, key))?;
        Ok(DocumentMeta::from(target.document_id(key)))
    }

    async fn count(&self, target: &CollectionRef) -> StoreResult<u64> {
        let databases = self.databases.read().await;
        let collection = self::collection(database(&databases, &target.database)?, &target.name)?;
        Ok(collection.documents.len() as u64)
    }

    async fn query(&self, database: &str, query: &Query) -> StoreResult<Cursor> {
        if let Query::RemoveIncidentEdges { edges, vertex } = query {
            let mut databases = self.databases.write().await;
            let collection = databases
                .get_mut(database)
                .and_then(|collections| collections.get_mut(edges))
                .ok_or_else(|| StoreError::not_found(format!("collection '{edges}' not found")))?;

            let removed = remove_incident(collection, &vertex.to_string());
            return Ok(self.cursor(removed));
        }

        let databases = self.databases.read().await;
        let db = self::database(&databases, database)?;
        let documents = match query {
            Query::Scan { collection } => self::collection(db, collection)?
                .documents
                .values()
                .cloned()
                .collect(),
            Query::ScanUnlinked {
                vertices,
                edges,
                direction,
            } => unlinked(
                self::collection(db, vertices)?,
                self::collection(db, edges)?,
                *direction,
            ),
            Query::FindEdge { edges, from, to } => find_edge(self::collection(db, edges)?, from, to),
            Query::Traverse { edges, traversal } => {
                traverse(db, self::collection(db, edges)?, traversal)
            }
            Query::ShortestPath {
                edges,
                from,
                to,
                limit,
            } => {
                let mut path = shortest_path(db, self::collection(db, edges)?, from, to);
                if let Some(limit) = limit {
                    path.truncate(usize::try_from(*limit).unwrap_or(usize::MAX));
                }
                path
            }
            Query::RemoveIncidentEdges { .. } => {
                return Err(StoreError::invalid_query("unexpected query kind"))
            }
        };
        Ok(self.cursor(documents))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("open_cursors", &self.open_cursors())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with(kind: CollectionKind) -> (MemoryStore, CollectionRef) {
        let store = MemoryStore::new();
        store.create_database("db").await.unwrap();
        let coll = store.create_collection("db", "c", kind).await.unwrap();
        (store, coll)
    }

    #[tokio::test]
    async fn test_generated_and_explicit_keys() {
        let (store, coll) = store_with(CollectionKind::Document).await;
        let generated = store.create_document(&coll, json!({"data": 1})).await.unwrap();
        assert_eq!(generated.key.len(), 32);
        assert_eq!(generated.id.collection(), "c");

        let named = store
            .create_document(&coll, json!({"_key": "a"}))
            .await
            .unwrap();
        assert_eq!(named.id.to_string(), "c/a");

        let err = store
            .create_document(&coll, json!({"_key": "a"}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_unique_index_enforced() {
        let (store, coll) = store_with(CollectionKind::Edge).await;
        store.ensure_unique_index(&coll, &["_from", "_to"]).await.unwrap();
        store.ensure_unique_index(&coll, &["_from", "_to"]).await.unwrap();

        let edge = json!({"_from": "v/1", "_to": "v/2"});
        store.create_document(&coll, edge.clone()).await.unwrap();
        let err = store.create_document(&coll, edge).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_edge_documents_need_ends() {
        let (store, coll) = store_with(CollectionKind::Edge).await;
        let err = store
            .create_document(&coll, json!({"_from": "v/1"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, dagstore_core::StoreErrorKind::InvalidQuery);
    }

    #[tokio::test]
    async fn test_update_merges_and_replace_overwrites() {
        let (store, coll) = store_with(CollectionKind::Document).await;
        store
            .create_document(&coll, json!({"_key": "a", "data": {"x": 1, "y": 2}}))
            .await
            .unwrap();

        store
            .update_document(&coll, "a", json!({"data": {"y": 3}}))
            .await
            .unwrap();
        let doc = store.read_document(&coll, "a").await.unwrap();
        assert_eq!(doc["data"], json!({"x": 1, "y": 3}));

        store
            .replace_document(&coll, "a", json!({"data": "new"}))
            .await
            .unwrap();
        let doc = store.read_document(&coll, "a").await.unwrap();
        assert_eq!(doc, json!({"_key": "a", "_id": "c/a", "data": "new"}));
    }

    #[tokio::test]
    async fn test_missing_documents_and_collections() {
        let (store, coll) = store_with(CollectionKind::Document).await;
        assert!(store.read_document(&coll, "nope").await.unwrap_err().is_not_found());
        assert!(store.remove_document(&coll, "nope").await.unwrap_err().is_not_found());

        let missing = CollectionRef::new("db", "other", CollectionKind::Document);
        assert!(store.count(&missing).await.unwrap_err().is_not_found());
        assert!(store.collection_exists("nodb", "c").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_keeps_insertion_order() {
        let (store, coll) = store_with(CollectionKind::Document).await;
        for key in ["a", "b", "c"] {
            store
                .create_document(&coll, json!({"_key": key}))
                .await
                .unwrap();
        }
        store.remove_document(&coll, "b").await.unwrap();

        let cursor = store
            .query("db", &Query::Scan { collection: "c".into() })
            .await
            .unwrap();
        assert_eq!(cursor.collect_keys().await.unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_cursor_accounting() {
        let (store, _) = store_with(CollectionKind::Document).await;
        let cursor = store
            .query("db", &Query::Scan { collection: "c".into() })
            .await
            .unwrap();
        assert_eq!(store.open_cursors(), 1);
        drop(cursor);
        assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn test_merge_nested_objects() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge(&mut target, json!({"a": {"c": 4}, "e": 5}));
        assert_eq!(target, json!({"a": {"b": 1, "c": 4}, "d": 3, "e": 5}));
    }

    fn walk(order: TraversalOrder, uniqueness: Uniqueness, limit: Option<u64>) -> Traversal {
        Traversal {
            start: DocumentId::new("v", "a"),
            direction: Direction::Outbound,
            min_depth: 1,
            max_depth: 10,
            order,
            uniqueness,
            limit,
        }
    }

    // a -> b, a -> c, b -> d, c -> d
    fn diamond(id: &str) -> Vec<&'static str> {
        match id {
            "v/a" => vec!["v/b", "v/c"],
            "v/b" | "v/c" => vec!["v/d"],
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_depth_first_skips_vertices_on_current_path() {
        let adjacency: HashMap<&str, Vec<&str>> =
            HashMap::from([("v/a", vec!["v/b"]), ("v/b", vec!["v/a", "v/c"])]);
        let traversal = walk(TraversalOrder::DepthFirst, Uniqueness::None, None);
        let found = depth_first(
            |id| adjacency.get(id).cloned().unwrap_or_default(),
            "v/a",
            &traversal,
        );
        assert_eq!(found, vec!["v/b", "v/c"]);
    }

    #[test]
    fn test_order_and_uniqueness_combine() {
        let cases = [
            (TraversalOrder::BreadthFirst, Uniqueness::Global, vec!["v/b", "v/c", "v/d"]),
            (TraversalOrder::BreadthFirst, Uniqueness::None, vec!["v/b", "v/c", "v/d", "v/d"]),
            (TraversalOrder::DepthFirst, Uniqueness::Global, vec!["v/b", "v/d", "v/c"]),
            (TraversalOrder::DepthFirst, Uniqueness::None, vec!["v/b", "v/d", "v/c", "v/d"]),
        ];
        for (order, uniqueness, expected) in cases {
            let traversal = walk(order, uniqueness, None);
            let found = match order {
                TraversalOrder::BreadthFirst => breadth_first(diamond, "v/a", &traversal),
                TraversalOrder::DepthFirst => depth_first(diamond, "v/a", &traversal),
            };
            assert_eq!(found, expected, "{order:?} / {uniqueness:?}");
        }
    }

    #[tokio::test]
    async fn test_breadth_first_query_without_uniqueness() {
        let store = MemoryStore::new();
        store.create_database("db").await.unwrap();
        let vertices = store
            .create_collection("db", "v", CollectionKind::Document)
            .await
            .unwrap();
        let edges = store
            .create_collection("db", "e", CollectionKind::Edge)
            .await
            .unwrap();
        for key in ["a", "b", "c", "d"] {
            store
                .create_document(&vertices, json!({"_key": key}))
                .await
                .unwrap();
        }
        for (from, to) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
            store
                .create_document(&edges, json!({"_from": format!("v/{from}"), "_to": format!("v/{to}")}))
                .await
                .unwrap();
        }

        let query = Query::Traverse {
            edges: "e".into(),
            traversal: walk(TraversalOrder::BreadthFirst, Uniqueness::None, None),
        };
        let keys = store.query("db", &query).await.unwrap().collect_keys().await.unwrap();
        assert_eq!(keys, vec!["b", "c", "d", "d"]);
    }

    #[tokio::test]
    async fn test_zero_limit_yields_nothing() {
        let store = MemoryStore::new();
        store.create_database("db").await.unwrap();
        let vertices = store
            .create_collection("db", "v", CollectionKind::Document)
            .await
            .unwrap();
        store
            .create_collection("db", "e", CollectionKind::Edge)
            .await
            .unwrap();
        store
            .create_document(&vertices, json!({"_key": "a"}))
            .await
            .unwrap();

        for order in [TraversalOrder::BreadthFirst, TraversalOrder::DepthFirst] {
            let query = Query::Traverse {
                edges: "e".into(),
                traversal: walk(order, order.uniqueness(), Some(0)),
            };
            let cursor = store.query("db", &query).await.unwrap();
            assert_eq!(cursor.total().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_edge_links_follow_removal_and_index_release() {
        let (store, coll) = store_with(CollectionKind::Edge).await;
        store.ensure_unique_index(&coll, &["_from", "_to"]).await.unwrap();
        let first = store
            .create_document(&coll, json!({"_from": "v/1", "_to": "v/2"}))
            .await
            .unwrap();
        store
            .create_document(&coll, json!({"_from": "v/1", "_to": "v/3"}))
            .await
            .unwrap();

        store.remove_document(&coll, &first.key).await.unwrap();
        // the freed (from, to) pair can be inserted again
        store
            .create_document(&coll, json!({"_from": "v/1", "_to": "v/2"}))
            .await
            .unwrap();

        let found = store
            .query(
                "db",
                &Query::FindEdge {
                    edges: "c".into(),
                    from: DocumentId::new("v", "1"),
                    to: DocumentId::new("v", "2"),
                },
            )
            .await
            .unwrap();
        assert_eq!(found.total().await.unwrap(), 1);

        let removed = store
            .query(
                "db",
                &Query::RemoveIncidentEdges {
                    edges: "c".into(),
                    vertex: DocumentId::new("v", "1"),
                },
            )
            .await
            .unwrap()
            .collect_documents::<Value>()
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0]["_to"], "v/3");
        assert_eq!(removed[1]["_to"], "v/2");
        assert_eq!(store.count(&coll).await.unwrap(), 0);
    }
}
