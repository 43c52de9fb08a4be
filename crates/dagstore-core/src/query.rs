//! Typed query model
//!
//! Queries are built by the graph layer and handed to a
//! [`DocumentStore`](crate::DocumentStore), which renders them into its own
//! query language. Every query exposes its bound parameters through
//! [`Query::bind_vars`] so stores can bind them instead of splicing values
//! into query text.

use crate::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Depth bound used for ancestor and descendant traversals
pub const MAX_DEPTH: u32 = 10_000;

/// Edge direction followed by a traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow edges from source to destination (children, descendants)
    #[default]
    Outbound,
    /// Follow edges from destination to source (parents, ancestors)
    Inbound,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Outbound => Self::Inbound,
            Self::Inbound => Self::Outbound,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outbound => "OUTBOUND",
            Self::Inbound => "INBOUND",
        }
    }
}

/// Order in which a traversal yields vertices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraversalOrder {
    #[default]
    #[serde(rename = "bfs")]
    BreadthFirst,
    #[serde(rename = "dfs")]
    DepthFirst,
}

impl TraversalOrder {
    pub fn from_dfs(dfs: bool) -> Self {
        if dfs {
            Self::DepthFirst
        } else {
            Self::BreadthFirst
        }
    }

    /// Uniqueness mode paired with this order.
    ///
    /// Breadth-first traversals yield each vertex once, at its shortest
    /// distance. Depth-first traversals enumerate complete paths and may
    /// yield a vertex once per path reaching it.
    pub fn uniqueness(self) -> Uniqueness {
        match self {
            Self::BreadthFirst => Uniqueness::Global,
            Self::DepthFirst => Uniqueness::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BreadthFirst => "bfs",
            Self::DepthFirst => "dfs",
        }
    }
}

/// Vertex uniqueness across one traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uniqueness {
    /// Each vertex is visited at most once
    Global,
    /// Vertices are revisited on every path reaching them
    None,
}

impl Uniqueness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::None => "none",
        }
    }
}

/// Parameters of a graph traversal starting at one vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    pub start: DocumentId,
    pub direction: Direction,
    pub min_depth: u32,
    pub max_depth: u32,
    pub order: TraversalOrder,
    pub uniqueness: Uniqueness,
    pub limit: Option<u64>,
}

/// A query understood by every [`DocumentStore`](crate::DocumentStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every document of a collection, in store order
    Scan { collection: String },

    /// Vertices without any neighbour in `direction`: roots for
    /// [`Direction::Inbound`], leaves for [`Direction::Outbound`]
    ScanUnlinked {
        vertices: String,
        edges: String,
        direction: Direction,
    },

    /// The edge connecting `from` to `to`, if any
    FindEdge {
        edges: String,
        from: DocumentId,
        to: DocumentId,
    },

    /// Vertices reachable from a start vertex
    Traverse { edges: String, traversal: Traversal },

    /// Vertices on the shortest outbound path, both endpoints included
    ShortestPath {
        edges: String,
        from: DocumentId,
        to: DocumentId,
        limit: Option<u64>,
    },

    /// Remove every edge touching `vertex`, yielding the removed edges.
    /// The removal happens when the query runs, not when the cursor drains.
    RemoveIncidentEdges { edges: String, vertex: DocumentId },
}

impl Query {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scan { .. } => "scan",
            Self::ScanUnlinked { .. } => "scan_unlinked",
            Self::FindEdge { .. } => "find_edge",
            Self::Traverse { .. } => "traverse",
            Self::ShortestPath { .. } => "shortest_path",
            Self::RemoveIncidentEdges { .. } => "remove_incident_edges",
        }
    }

    /// Bound parameters of this query.
    ///
    /// Collection parameters are prefixed with `@`.
    pub fn bind_vars(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        match self {
            Self::Scan { collection } => {
                vars.insert("@collection".into(), json!(collection));
            }
            Self::ScanUnlinked {
                vertices,
                edges,
                direction,
            } => {
                vars.insert("@vertexCollection".into(), json!(vertices));
                vars.insert("@edgeCollection".into(), json!(edges));
                vars.insert("direction".into(), json!(direction.as_str()));
            }
            Self::FindEdge { edges, from, to } => {
                vars.insert("@collection".into(), json!(edges));
                vars.insert("from".into(), json!(from.to_string()));
                vars.insert("to".into(), json!(to.to_string()));
            }
            Self::Traverse { edges, traversal } => {
                vars.insert("@collection".into(), json!(edges));
                vars.insert("from".into(), json!(traversal.start.to_string()));
                vars.insert("direction".into(), json!(traversal.direction.as_str()));
                vars.insert("minDepth".into(), json!(traversal.min_depth));
                vars.insert("depth".into(), json!(traversal.max_depth));
                vars.insert("order".into(), json!(traversal.order.as_str()));
                vars.insert(
                    "uniqueVertices".into(),
                    json!(traversal.uniqueness.as_str()),
                );
                if let Some(limit) = traversal.limit {
                    vars.insert("limit".into(), json!(limit));
                }
            }
            Self::ShortestPath {
                edges,
                from,
                to,
                limit,
            } => {
                vars.insert("@collection".into(), json!(edges));
                vars.insert("from".into(), json!(from.to_string()));
                vars.insert("to".into(), json!(to.to_string()));
                if let Some(limit) = limit {
                    vars.insert("limit".into(), json!(limit));
                }
            }
            Self::RemoveIncidentEdges { edges, vertex } => {
                vars.insert("@edgeCollection".into(), json!(edges));
                vars.insert("from".into(), json!(vertex.to_string()));
            }
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_implies_uniqueness() {
        assert_eq!(TraversalOrder::BreadthFirst.uniqueness(), Uniqueness::Global);
        assert_eq!(TraversalOrder::DepthFirst.uniqueness(), Uniqueness::None);
        assert_eq!(TraversalOrder::from_dfs(true), TraversalOrder::DepthFirst);
        assert_eq!(TraversalOrder::default(), TraversalOrder::BreadthFirst);
    }

    #[test]
    fn test_traverse_bind_vars() {
        let query = Query::Traverse {
            edges: "e_g".into(),
            traversal: Traversal {
                start: DocumentId::new("v_g", "0"),
                direction: Direction::Inbound,
                min_depth: 1,
                max_depth: MAX_DEPTH,
                order: TraversalOrder::DepthFirst,
                uniqueness: Uniqueness::None,
                limit: None,
            },
        };

        let vars = query.bind_vars();
        assert_eq!(vars["@collection"], "e_g");
        assert_eq!(vars["from"], "v_g/0");
        assert_eq!(vars["direction"], "INBOUND");
        assert_eq!(vars["depth"], 10_000);
        assert_eq!(vars["order"], "dfs");
        assert_eq!(vars["uniqueVertices"], "none");
        assert!(!vars.contains_key("limit"));
        assert_eq!(query.kind(), "traverse");
    }

    #[test]
    fn test_shortest_path_bind_vars_include_limit() {
        let query = Query::ShortestPath {
            edges: "e_g".into(),
            from: DocumentId::new("v_g", "1"),
            to: DocumentId::new("v_g", "0"),
            limit: Some(1),
        };
        let vars = query.bind_vars();
        assert_eq!(vars["from"], "v_g/1");
        assert_eq!(vars["to"], "v_g/0");
        assert_eq!(vars["limit"], 1);
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Outbound.reverse(), Direction::Inbound);
        assert_eq!(Direction::Inbound.reverse(), Direction::Outbound);
    }
}
