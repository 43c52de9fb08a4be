//! Traversal queries: relatives, shortest paths, roots and leaves

use crate::dag::{require_key, Dag};
use dagstore_core::cursor::document_key;
use dagstore_core::{
    Cursor, Direction, DocumentId, Query, Result, Traversal, TraversalOrder, Uniqueness,
    MAX_DEPTH,
};
use std::ops::ControlFlow;

/// Builder for traversals starting at one vertex.
///
/// Defaults to direct children in breadth-first order.
#[derive(Debug, Clone)]
pub struct TraversalBuilder {
    start: String,
    direction: Direction,
    max_depth: u32,
    order: TraversalOrder,
    uniqueness: Option<Uniqueness>,
    limit: Option<u64>,
}

impl TraversalBuilder {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            direction: Direction::Outbound,
            max_depth: 1,
            order: TraversalOrder::BreadthFirst,
            uniqueness: None,
            limit: None,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Depth bound, clamped to `1..=MAX_DEPTH`
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth.clamp(1, MAX_DEPTH);
        self
    }

    pub fn dfs(self, dfs: bool) -> Self {
        self.order(TraversalOrder::from_dfs(dfs))
    }

    pub fn order(mut self, order: TraversalOrder) -> Self {
        self.order = order;
        self
    }

    /// Override the uniqueness implied by the order
    pub fn uniqueness(mut self, uniqueness: Uniqueness) -> Self {
        self.uniqueness = Some(uniqueness);
        self
    }

    /// Stop after `limit` results
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    /// Resolve the traversal against a vertex collection
    pub fn build(&self, vertices: &str) -> Traversal {
        Traversal {
            start: DocumentId::new(vertices, self.start.clone()),
            direction: self.direction,
            min_depth: 1,
            max_depth: self.max_depth,
            order: self.order,
            uniqueness: self.uniqueness.unwrap_or(self.order.uniqueness()),
            limit: self.limit,
        }
    }

    pub fn into_query(self, vertices: &str, edges: &str) -> Query {
        Query::Traverse {
            edges: edges.to_string(),
            traversal: self.build(vertices),
        }
    }
}

impl Dag {
    /// Start building a traversal from `key`
    pub fn traversal(&self, key: &str) -> TraversalBuilder {
        TraversalBuilder::new(key)
    }

    /// Run a traversal, returning a cursor over the visited vertices
    pub async fn traverse(&self, builder: TraversalBuilder) -> Result<Cursor> {
        require_key(builder.start())?;
        let query = builder.into_query(&self.vertices.name, &self.edges.name);
        self.query(query).await
    }

    fn relatives(&self, key: &str, direction: Direction) -> TraversalBuilder {
        self.traversal(key).direction(direction)
    }

    fn lineage(&self, key: &str, direction: Direction, dfs: bool) -> TraversalBuilder {
        self.relatives(key, direction)
            .max_depth(self.max_depth())
            .dfs(dfs)
    }

    /// Direct predecessors of a vertex
    pub async fn parents(&self, key: &str) -> Result<Cursor> {
        self.traverse(self.relatives(key, Direction::Inbound)).await
    }

    /// Direct successors of a vertex
    pub async fn children(&self, key: &str) -> Result<Cursor> {
        self.traverse(self.relatives(key, Direction::Outbound)).await
    }

    /// Every vertex reaching `key`.
    ///
    /// Breadth-first yields each ancestor once, nearest first. Depth-first
    /// yields an ancestor once per path.
    pub async fn ancestors(&self, key: &str, dfs: bool) -> Result<Cursor> {
        self.traverse(self.lineage(key, Direction::Inbound, dfs)).await
    }

    /// Every vertex reachable from `key`, with the same ordering rules as
    /// [`Dag::ancestors`]
    pub async fn descendants(&self, key: &str, dfs: bool) -> Result<Cursor> {
        self.traverse(self.lineage(key, Direction::Outbound, dfs)).await
    }

    pub async fn parent_count(&self, key: &str) -> Result<u64> {
        self.parents(key).await?.total().await
    }

    pub async fn child_count(&self, key: &str) -> Result<u64> {
        self.children(key).await?.total().await
    }

    /// Vertices on a shortest path from `src` to `dst`, both included.
    ///
    /// Empty when no path exists or either vertex is unknown.
    pub async fn shortest_path(&self, src: &str, dst: &str) -> Result<Cursor> {
        require_key(src)?;
        require_key(dst)?;
        self.query(Query::ShortestPath {
            edges: self.edges.name.clone(),
            from: self.vertex_id(src),
            to: self.vertex_id(dst),
            limit: None,
        })
        .await
    }

    /// Reachability check: true if `to` is reachable from `from`
    pub(crate) async fn path_exists(&self, from: &DocumentId, to: &DocumentId) -> Result<bool> {
        self.exists(Query::ShortestPath {
            edges: self.edges.name.clone(),
            from: from.clone(),
            to: to.clone(),
            limit: Some(1),
        })
        .await
    }

    /// Vertices without parents
    pub async fn roots(&self) -> Result<Cursor> {
        self.unlinked(Direction::Inbound).await
    }

    /// Vertices without children
    pub async fn leaves(&self) -> Result<Cursor> {
        self.unlinked(Direction::Outbound).await
    }

    async fn unlinked(&self, direction: Direction) -> Result<Cursor> {
        self.query(Query::ScanUnlinked {
            vertices: self.vertices.name.clone(),
            edges: self.edges.name.clone(),
            direction,
        })
        .await
    }

    /// Visit the key of every ancestor until the visitor breaks.
    ///
    /// Returns the number of visited vertices.
    pub async fn walk_ancestors<F>(&self, key: &str, dfs: bool, visitor: F) -> Result<usize>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        walk(self.ancestors(key, dfs).await?, visitor).await
    }

    /// Visit the key of every descendant until the visitor breaks
    pub async fn walk_descendants<F>(&self, key: &str, dfs: bool, visitor: F) -> Result<usize>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        walk(self.descendants(key, dfs).await?, visitor).await
    }
}

async fn walk<F>(mut cursor: Cursor, mut visitor: F) -> Result<usize>
where
    F: FnMut(&str) -> ControlFlow<()>,
{
    let mut visited = 0;
    while let Some(document) = cursor.next_document().await? {
        visited += 1;
        if visitor(&document_key(&document)?).is_break() {
            break;
        }
    }
    Ok(visited)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_children() {
        let traversal = TraversalBuilder::new("a").build("v_g");
        assert_eq!(traversal.start.to_string(), "v_g/a");
        assert_eq!(traversal.direction, Direction::Outbound);
        assert_eq!(traversal.min_depth, 1);
        assert_eq!(traversal.max_depth, 1);
        assert_eq!(traversal.uniqueness, Uniqueness::Global);
        assert_eq!(traversal.limit, None);
    }

    #[test]
    fn test_builder_dfs_drops_uniqueness() {
        let traversal = TraversalBuilder::new("a")
            .direction(Direction::Inbound)
            .max_depth(MAX_DEPTH)
            .dfs(true)
            .limit(3)
            .build("v_g");
        assert_eq!(traversal.order, TraversalOrder::DepthFirst);
        assert_eq!(traversal.uniqueness, Uniqueness::None);
        assert_eq!(traversal.max_depth, MAX_DEPTH);
        assert_eq!(traversal.limit, Some(3));
    }

    #[test]
    fn test_builder_uniqueness_override() {
        let traversal = TraversalBuilder::new("a")
            .uniqueness(Uniqueness::None)
            .build("v_g");
        assert_eq!(traversal.order, TraversalOrder::BreadthFirst);
        assert_eq!(traversal.uniqueness, Uniqueness::None);
    }

    #[test]
    fn test_builder_clamps_depth() {
        assert_eq!(TraversalBuilder::new("a").max_depth(0).build("v").max_depth, 1);
        assert_eq!(
            TraversalBuilder::new("a").max_depth(u32::MAX).build("v").max_depth,
            MAX_DEPTH
        );
    }

    #[test]
    fn test_into_query() {
        let query = TraversalBuilder::new("a").into_query("v_g", "e_g");
        assert!(matches!(query, Query::Traverse { ref edges, .. } if edges == "e_g"));
    }
}
