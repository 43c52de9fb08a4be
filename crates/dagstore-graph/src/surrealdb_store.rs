//! SurrealDB implementation of the document store
//!
//! Databases map to SurrealDB databases inside the configured namespace,
//! vertex collections to normal tables and edge collections to relation
//! tables whose `in`/`out` fields carry the edge ends. Every statement batch
//! starts with `USE DB` so one connection can serve several databases.
//!
//! Traversals and shortest paths run as recursive graph idioms
//! (`$start.{1..n+collect}(->edges->vertices)`), so the database walks the
//! graph. Recursion depth is capped at [`RECURSION_LIMIT`].

use async_trait::async_trait;
use dagstore_core::{
    valid_name, CollectionKind, CollectionRef, Cursor, Direction, DocumentId, DocumentMeta,
    DocumentStore, Query, StoreConfig, StoreError, StoreResult, Traversal, TraversalOrder,
    Uniqueness,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::{Response, Surreal};
use uuid::Uuid;

/// Fields every returned document carries: `_key`, `_id`, the payload and,
/// for edges, `_from`/`_to` rendered as `collection/key`
const PROJECTION: &str = "<string> record::id(id) AS _key, \
     string::concat(record::tb(id), '/', <string> record::id(id)) AS _id, \
     data, \
     IF in THEN string::concat(record::tb(in), '/', <string> record::id(in)) END AS _from, \
     IF out THEN string::concat(record::tb(out), '/', <string> record::id(out)) END AS _to";

/// Deepest recursion SurrealDB evaluates in a graph idiom
pub const RECURSION_LIMIT: u32 = 256;

type Vars = Vec<(String, Value)>;

/// SurrealDB document store
#[derive(Clone)]
pub struct SurrealDbStore {
    client: Surreal<Client>,
}

impl SurrealDbStore {
    /// Connect, sign in as root and select the configured namespace
    pub async fn new(config: &StoreConfig) -> StoreResult<Self> {
        // the ws engine adds the scheme itself
        let url = config
            .url
            .strip_prefix("ws://")
            .or_else(|| config.url.strip_prefix("wss://"))
            .unwrap_or(&config.url);

        let client = Surreal::new::<Ws>(url).await.map_err(|e| {
            StoreError::connection(format!("SurrealDB connection to {url} failed: {e}"))
        })?;

        client
            .signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StoreError::connection(format!("SurrealDB auth failed: {e}")))?;

        client
            .use_ns(&config.namespace)
            .await
            .map_err(|e| StoreError::connection(format!("SurrealDB namespace error: {e}")))?;

        tracing::info!(url, namespace = %config.namespace, "connected to SurrealDB");
        Ok(Self { client })
    }

    /// Run a statement batch against `database`; the `USE DB` statement
    /// takes result index 0
    async fn run(&self, database: &str, statements: &str, vars: Vars) -> StoreResult<Response> {
        check_name(database)?;
        let mut request = self.client.query(format!("USE DB {database};\n{statements}"));
        for var in vars {
            request = request.bind(var);
        }
        let response = request
            .await
            .map_err(|e| store_error("query failed", e))?;
        response.check().map_err(|e| store_error("query failed", e))
    }

    async fn select_one(&self, database: &str, id: &DocumentId) -> StoreResult<Option<Value>> {
        let mut vars = Vars::new();
        thing_vars(&mut vars, "doc", id);
        let statement = format!("SELECT {PROJECTION} FROM ONLY type::thing($doc_tb, $doc_key);");
        let mut response = self.run(database, &statement, vars).await?;
        response
            .take::<Option<Value>>(1)
            .map_err(|e| store_error("read failed", e))
    }

    async fn select_many(&self, database: &str, statement: &str, vars: Vars) -> StoreResult<Vec<Value>> {
        let mut response = self.run(database, statement, vars).await?;
        let last = response.num_statements().saturating_sub(1);
        response
            .take::<Vec<Value>>(last)
            .map_err(|e| store_error("select failed", e))
    }

    /// Documents of `keys` in `vertices`, in the order of `keys`; a key may
    /// repeat
    async fn documents_by_key(
        &self,
        database: &str,
        vertices: &str,
        keys: &[String],
    ) -> StoreResult<Vec<Value>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let distinct: Vec<&String> = keys.iter().filter(|key| seen.insert(*key)).collect();
        let vars = vec![
            ("tb".to_string(), Value::String(vertices.to_string())),
            ("keys".to_string(), json!(distinct)),
        ];
        let statement = format!(
            "LET $things = array::map($keys, |$k| type::thing($tb, $k));\n\
             SELECT {PROJECTION} FROM $things;"
        );
        let documents = self.select_many(database, &statement, vars).await?;

        let by_key: HashMap<String, Value> = documents
            .into_iter()
            .filter_map(|document| {
                let key = document.get("_key")?.as_str()?.to_string();
                Some((key, document))
            })
            .collect();
        Ok(keys.iter().filter_map(|key| by_key.get(key).cloned()).collect())
    }

    async fn shortest_path(
        &self,
        database: &str,
        edges: &str,
        from: &DocumentId,
        to: &DocumentId,
    ) -> StoreResult<Vec<Value>> {
        let vertices = from.collection();
        check_name(vertices)?;
        check_name(edges)?;
        if self.select_one(database, from).await?.is_none()
            || self.select_one(database, to).await?.is_none()
        {
            return Ok(Vec::new());
        }
        if from == to {
            return self
                .documents_by_key(database, vertices, &[to.key().to_string()])
                .await;
        }

        let mut vars = Vars::new();
        thing_vars(&mut vars, "from", from);
        thing_vars(&mut vars, "to", to);
        let statement = format!(
            "LET $from = type::thing($from_tb, $from_key);\n\
             LET $to = type::thing($to_tb, $to_key);\n\
             RETURN array::map(($from{recursion}{step}) ?? [], |$v| <string> record::id($v));",
            recursion = recursion(1, RECURSION_LIMIT, "+shortest=$to"),
            step = step(Direction::Outbound, edges, vertices),
        );
        let found = keys(self.select_many(database, &statement, vars).await?)?;
        let path = shortest_path_keys(from.key(), to.key(), found);
        self.documents_by_key(database, vertices, &path).await
    }

    async fn traverse(
        &self,
        database: &str,
        edges: &str,
        traversal: &Traversal,
    ) -> StoreResult<Cursor> {
        let vertices = traversal.start.collection();
        check_name(vertices)?;
        check_name(edges)?;
        if limit_reached(0, traversal.limit)
            || self.select_one(database, &traversal.start).await?.is_none()
        {
            return Ok(Cursor::empty());
        }

        let min_depth = traversal.min_depth.max(1);
        let max_depth = traversal.max_depth.min(RECURSION_LIMIT);
        let collect = traversal.order == TraversalOrder::BreadthFirst
            && traversal.uniqueness == Uniqueness::Global
            && min_depth == 1;
        let instruction = if collect { "+collect" } else { "+path" };

        let mut vars = Vars::new();
        thing_vars(&mut vars, "start", &traversal.start);
        let statement = format!(
            "LET $start = type::thing($start_tb, $start_key);\n\
             LET $found = ($start{recursion}{step}) ?? [];\n\
             RETURN array::map($found, |$v| {render});",
            recursion = recursion(min_depth, max_depth, instruction),
            step = step(traversal.direction, edges, vertices),
            render = if collect {
                "<string> record::id($v)"
            } else {
                "array::map($v, |$w| <string> record::id($w))"
            },
        );
        let rows = self.select_many(database, &statement, vars).await?;

        let mut found = if collect {
            keys(rows)?
        } else {
            let paths = rows
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<Vec<String>>, _>>()
                .map_err(|e| StoreError::other(format!("unexpected path result: {e}")))?;
            PathTree::new(paths).walk(traversal.start.key(), traversal)
        };
        if let Some(limit) = traversal.limit {
            found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        let documents = self.documents_by_key(database, vertices, &found).await?;
        Ok(Cursor::from_documents(documents))
    }
}

/// Recursion part of a graph idiom, e.g. `.{1..10+collect}`
fn recursion(min_depth: u32, max_depth: u32, instruction: &str) -> String {
    format!(".{{{min_depth}..{max_depth}{instruction}}}")
}

/// One hop along `edges` into `vertices`, in `direction`
fn step(direction: Direction, edges: &str, vertices: &str) -> String {
    match direction {
        Direction::Outbound => format!("(->{edges}->{vertices})"),
        Direction::Inbound => format!("(<-{edges}<-{vertices})"),
    }
}

fn keys(rows: Vec<Value>) -> StoreResult<Vec<String>> {
    rows.into_iter()
        .map(|row| match row {
            Value::String(key) => Ok(key),
            other => Err(StoreError::other(format!("expected a record key, got {other}"))),
        })
        .collect()
}

/// Complete a shortest-path result into `from ..= to`, or nothing when the
/// result does not reach `to`
fn shortest_path_keys(from: &str, to: &str, mut found: Vec<String>) -> Vec<String> {
    if found.last().map(String::as_str) != Some(to) {
        return Vec::new();
    }
    if found.first().map(String::as_str) != Some(from) {
        found.insert(0, from.to_string());
    }
    found
}

fn limit_reached(emitted: usize, limit: Option<u64>) -> bool {
    limit.is_some_and(|limit| emitted as u64 >= limit)
}

/// Paths returned by a recursive query, merged on common prefixes.
///
/// Node 0 is the start vertex. Walking the tree replays a traversal over the
/// reached part of the graph: every path of the graph within the depth bound
/// is a path of the tree.
#[derive(Debug)]
struct PathTree {
    keys: Vec<String>,
    children: Vec<Vec<usize>>,
}

impl PathTree {
    fn new(paths: Vec<Vec<String>>) -> Self {
        let mut tree = Self {
            keys: vec![String::new()],
            children: vec![Vec::new()],
        };
        for path in paths {
            let mut node = 0;
            for key in path {
                let existing = tree.children[node]
                    .iter()
                    .copied()
                    .find(|&child| tree.keys[child] == key);
                node = match existing {
                    Some(child) => child,
                    None => {
                        let child = tree.keys.len();
                        tree.keys.push(key);
                        tree.children.push(Vec::new());
                        tree.children[node].push(child);
                        child
                    }
                };
            }
        }
        tree
    }

    /// Vertex keys in traversal order
    fn walk(&self, start: &str, traversal: &Traversal) -> Vec<String> {
        let mut found = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut pending: VecDeque<(usize, u32)> =
            self.children[0].iter().map(|&child| (child, 1)).collect();

        while let Some((node, depth)) = pending.pop_front() {
            let key = self.keys[node].as_str();
            if traversal.uniqueness == Uniqueness::Global && !seen.insert(key) {
                continue;
            }
            if depth >= traversal.min_depth {
                found.push(key.to_string());
                if limit_reached(found.len(), traversal.limit) {
                    break;
                }
            }
            let children = self.children[node].iter().map(|&child| (child, depth + 1));
            match traversal.order {
                TraversalOrder::BreadthFirst => pending.extend(children),
                TraversalOrder::DepthFirst => {
                    for child in children.rev() {
                        pending.push_front(child);
                    }
                }
            }
        }
        found
    }
}

/// Bind a document id as `<prefix>_tb` and `<prefix>_key`
fn thing_vars(vars: &mut Vars, prefix: &str, id: &DocumentId) {
    vars.push((format!("{prefix}_tb"), Value::String(id.collection().to_string())));
    vars.push((format!("{prefix}_key"), Value::String(id.key().to_string())));
}

fn document_id(document: &Value) -> StoreResult<DocumentId> {
    document
        .get("_id")
        .and_then(Value::as_str)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| StoreError::other(format!("result document has no valid _id: {document}")))
}

fn check_name(name: &str) -> StoreResult<()> {
    if valid_name(name) {
        Ok(())
    } else {
        Err(StoreError::invalid_query(format!("invalid name '{name}'")))
    }
}

/// Field names as stored in SurrealDB
fn field_name(field: &str) -> &str {
    match field {
        "_from" => "in",
        "_to" => "out",
        "_key" | "_id" => "id",
        other => other,
    }
}

/// Document body without the fields SurrealDB keeps in the record id and
/// the relation ends
fn content(document: Value) -> StoreResult<Value> {
    let Value::Object(mut object) = document else {
        return Err(StoreError::invalid_query("documents must be objects"));
    };
    for field in ["_key", "_id", "_from", "_to"] {
        object.remove(field);
    }
    Ok(Value::Object(object))
}

fn store_error(context: &str, err: surrealdb::Error) -> StoreError {
    let message = format!("{context}: {err}");
    let lower = message.to_lowercase();
    if lower.contains("already exists") || lower.contains("already contains") {
        StoreError::conflict(message)
    } else if lower.contains("does not exist") || lower.contains("not found") {
        StoreError::not_found(message)
    } else if lower.contains("parse error") || lower.contains("invalid") {
        StoreError::invalid_query(message)
    } else if lower.contains("connection") || lower.contains("websocket") {
        StoreError::connection(message)
    } else {
        StoreError::other(message)
    }
}

fn not_found(collection: &CollectionRef, key: &str) -> StoreError {
    StoreError::not_found(format!("document '{}/{key}' not found", collection.name))
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

#[async_trait]
impl DocumentStore for SurrealDbStore {
    async fn database_exists(&self, database: &str) -> StoreResult<bool> {
        let mut response = self
            .client
            .query("INFO FOR NS;")
            .await
            .map_err(|e| store_error("namespace info failed", e))?;
        let info: Option<Value> = response
            .take(0)
            .map_err(|e| store_error("namespace info failed", e))?;
        Ok(info
            .as_ref()
            .and_then(|info| info.get("databases"))
            .and_then(|databases| databases.get(database))
            .is_some())
    }

    async fn create_database(&self, database: &str) -> StoreResult<()> {
        check_name(database)?;
        self.client
            .query(format!("DEFINE DATABASE {database};"))
            .await
            .and_then(Response::check)
            .map_err(|e| store_error("create database failed", e))?;
        tracing::info!(database, "database created");
        Ok(())
    }

    async fn collection_exists(&self, database: &str, name: &str) -> StoreResult<bool> {
        let mut response = self.run(database, "INFO FOR DB;", Vars::new()).await?;
        let info: Option<Value> = response
            .take(1)
            .map_err(|e| store_error("database info failed", e))?;
        Ok(info
            .as_ref()
            .and_then(|info| info.get("tables"))
            .and_then(|tables| tables.get(name))
            .is_some())
    }

    async fn create_collection(
        &self,
        database: &str,
        name: &str,
        kind: CollectionKind,
    ) -> StoreResult<CollectionRef> {
        check_name(name)?;
        let table_type = match kind {
            CollectionKind::Document => "NORMAL",
            CollectionKind::Edge => "RELATION",
        };
        let statement = format!("DEFINE TABLE {name} TYPE {table_type} SCHEMALESS;");
        self.run(database, &statement, Vars::new()).await?;
        tracing::info!(database, collection = name, ?kind, "collection created");
        Ok(CollectionRef::new(database, name, kind))
    }

    async fn ensure_unique_index(
        &self,
        collection: &CollectionRef,
        fields: &[&str],
    ) -> StoreResult<()> {
        check_name(&collection.name)?;
        let columns: Vec<&str> = fields.iter().map(|f| field_name(f)).collect();
        for column in &columns {
            check_name(column)?;
        }
        let statement = format!(
            "DEFINE INDEX IF NOT EXISTS {table}_{suffix}_unique ON TABLE {table} FIELDS {fields} UNIQUE;",
            table = collection.name,
            suffix = columns.join("_"),
            fields = columns.join(", "),
        );
        self.run(&collection.database, &statement, Vars::new()).await?;
        Ok(())
    }

    async fn create_document(
        &self,
        collection: &CollectionRef,
        document: Value,
    ) -> StoreResult<DocumentMeta> {
        match collection.kind {
            CollectionKind::Document => {
                let key = match document.get("_key").and_then(Value::as_str) {
                    Some(key) if !key.is_empty() => key.to_string(),
                    _ => Uuid::new_v4().simple().to_string(),
                };
                let vars = vec![
                    ("tb".to_string(), Value::String(collection.name.clone())),
                    ("key".to_string(), Value::String(key.clone())),
                    ("content".to_string(), content(document)?),
                ];
                self.run(
                    &collection.database,
                    "CREATE type::thing($tb, $key) CONTENT $content RETURN NONE;",
                    vars,
                )
                .await?;
                Ok(DocumentMeta::from(collection.document_id(key)))
            }
            CollectionKind::Edge => {
                check_name(&collection.name)?;
                let end = |field: &str| -> StoreResult<DocumentId> {
                    document
                        .get(field)
                        .and_then(Value::as_str)
                        .and_then(|id| id.parse().ok())
                        .ok_or_else(|| {
                            StoreError::invalid_query(format!("edge document needs {field}"))
                        })
                };
                let (from, to) = (end("_from")?, end("_to")?);

                let mut vars = vec![("content".to_string(), content(document)?)];
                thing_vars(&mut vars, "from", &from);
                thing_vars(&mut vars, "to", &to);
                let statement = format!(
                    "LET $from = type::thing($from_tb, $from_key);\n\
                     LET $to = type::thing($to_tb, $to_key);\n\
                     LET $edge = (RELATE $from->{edges}->$to CONTENT $content RETURN AFTER);\n\
                     RETURN <string> record::id($edge[0].id);",
                    edges = collection.name,
                );
                let mut response = self.run(&collection.database, &statement, vars).await?;
                let last = response.num_statements().saturating_sub(1);
                let key: Option<String> = response
                    .take(last)
                    .map_err(|e| store_error("relate failed", e))?;
                let key = key.ok_or_else(|| StoreError::other("relate returned no edge"))?;
                Ok(DocumentMeta::from(collection.document_id(key)))
            }
        }
    }

    async fn read_document(&self, collection: &CollectionRef, key: &str) -> StoreResult<Value> {
        self.select_one(&collection.database, &collection.document_id(key))
            .await?
            .ok_or_else(|| not_found(collection, key))
    }

    async fn update_document(
        &self,
        collection: &CollectionRef,
        key: &str,
        patch: Value,
    ) -> StoreResult<DocumentMeta> {
        let vars = vec![
            ("tb".to_string(), Value::String(collection.name.clone())),
            ("key".to_string(), Value::String(key.to_string())),
            ("patch".to_string(), content(patch)?),
        ];
        let mut response = self
            .run(
                &collection.database,
                "UPDATE ONLY type::thing($tb, $key) MERGE $patch RETURN VALUE id;",
                vars,
            )
            .await?;
        let updated: Option<Value> = response
            .take(1)
            .map_err(|e| store_error("update failed", e))?;
        match updated {
            Some(_) => Ok(DocumentMeta::from(collection.document_id(key))),
            None => Err(not_found(collection, key)),
        }
    }

    async fn replace_document(
        &self,
        collection: &CollectionRef,
        key: &str,
        document: Value,
    ) -> StoreResult<DocumentMeta> {
        let document = content(document)?;
        let statement = match collection.kind {
            CollectionKind::Document => {
                "UPDATE ONLY type::thing($tb, $key) CONTENT $document RETURN VALUE id;"
            }
            // relation records keep their ends; only the payload is replaced
            CollectionKind::Edge => {
                "UPDATE ONLY type::thing($tb, $key) SET data = $document.data RETURN VALUE id;"
            }
        };
        let vars = vec![
            ("tb".to_string(), Value::String(collection.name.clone())),
            ("key".to_string(), Value::String(key.to_string())),
            ("document".to_string(), document),
        ];
        let mut response = self.run(&collection.database, statement, vars).await?;
        let replaced: Option<Value> = response
            .take(1)
            .map_err(|e| store_error("replace failed", e))?;
        match replaced {
            Some(_) => Ok(DocumentMeta::from(collection.document_id(key))),
            None => Err(not_found(collection, key)),
        }
    }

    async fn remove_document(
        &self,
        collection: &CollectionRef,
        key: &str,
    ) -> StoreResult<DocumentMeta> {
        let vars = vec![
            ("tb".to_string(), Value::String(collection.name.clone())),
            ("key".to_string(), Value::String(key.to_string())),
        ];
        let mut response = self
            .run(
                &collection.database,
                "DELETE ONLY type::thing($tb, $key) RETURN BEFORE;",
                vars,
            )
            .await?;
        let removed: Option<Value> = response
            .take(1)
            .map_err(|e| store_error("delete failed", e))?;
        match removed {
            Some(_) => Ok(DocumentMeta::from(collection.document_id(key))),
            None => Err(not_found(collection, key)),
        }
    }

    async fn count(&self, collection: &CollectionRef) -> StoreResult<u64> {
        let vars = vec![("tb".to_string(), Value::String(collection.name.clone()))];
        let mut response = self
            .run(
                &collection.database,
                "SELECT count() FROM type::table($tb) GROUP ALL;",
                vars,
            )
            .await?;
        let rows: Vec<CountRow> = response
            .take(1)
            .map_err(|e| store_error("count failed", e))?;
        Ok(rows.first().map_or(0, |row| row.count))
    }

    async fn query(&self, database: &str, query: &Query) -> StoreResult<Cursor> {
        let documents = match query {
            Query::Scan { collection } => {
                let vars = vec![("tb".to_string(), Value::String(collection.clone()))];
                let statement = format!("SELECT {PROJECTION} FROM type::table($tb);");
                self.select_many(database, &statement, vars).await?
            }
            Query::ScanUnlinked {
                vertices,
                edges,
                direction,
            } => {
                check_name(edges)?;
                let arrow = match direction {
                    Direction::Inbound => "<-",
                    Direction::Outbound => "->",
                };
                let vars = vec![("tb".to_string(), Value::String(vertices.clone()))];
                let statement = format!(
                    "SELECT {PROJECTION} FROM type::table($tb) WHERE array::len({arrow}{edges}) = 0;"
                );
                self.select_many(database, &statement, vars).await?
            }
            Query::FindEdge { edges, from, to } => {
                let mut vars = vec![("edges".to_string(), Value::String(edges.clone()))];
                thing_vars(&mut vars, "from", from);
                thing_vars(&mut vars, "to", to);
                let statement = format!(
                    "SELECT {PROJECTION} FROM type::table($edges) \
                     WHERE in = type::thing($from_tb, $from_key) \
                     AND out = type::thing($to_tb, $to_key) LIMIT 1;"
                );
                self.select_many(database, &statement, vars).await?
            }
            Query::Traverse { edges, traversal } => {
                return self.traverse(database, edges, traversal).await;
            }
            Query::ShortestPath {
                edges,
                from,
                to,
                limit,
            } => {
                let mut path = self.shortest_path(database, edges, from, to).await?;
                if let Some(limit) = limit {
                    path.truncate(usize::try_from(*limit).unwrap_or(usize::MAX));
                }
                path
            }
            Query::RemoveIncidentEdges { edges, vertex } => {
                let mut vars = vec![("edges".to_string(), Value::String(edges.clone()))];
                thing_vars(&mut vars, "vertex", vertex);
                let statement = format!(
                    "LET $vertex = type::thing($vertex_tb, $vertex_key);\n\
                     LET $removed = (SELECT {PROJECTION} FROM type::table($edges) \
                     WHERE in = $vertex OR out = $vertex);\n\
                     DELETE type::table($edges) WHERE in = $vertex OR out = $vertex;\n\
                     RETURN $removed;"
                );
                self.select_many(database, &statement, vars).await?
            }
        };
        Ok(Cursor::from_documents(documents))
    }
}

impl std::fmt::Debug for SurrealDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealDbStore").finish_non_exhaustive()
    }
}
