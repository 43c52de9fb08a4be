//! Export of the stored graph as a petgraph graph and as DOT text

use crate::dag::Dag;
use dagstore_core::{DocumentId, DocumentMeta, Result};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Deserialize;
use std::collections::HashMap;

/// Node weights are vertex keys, edge weights are edge keys
pub type ExportGraph = DiGraph<String, String>;

#[derive(Debug, Deserialize)]
struct EdgeEnds {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_from")]
    from: DocumentId,
    #[serde(rename = "_to")]
    to: DocumentId,
}

impl Dag {
    /// Read every vertex and edge into an in-memory graph.
    ///
    /// Node indices follow the order in which vertices are read. The returned
    /// map resolves vertex ids to their node.
    pub async fn dot_graph(&self) -> Result<(ExportGraph, HashMap<DocumentId, NodeIndex>)> {
        let mut graph = ExportGraph::new();
        let mut nodes = HashMap::new();

        let mut vertices = self.all_vertices().await?;
        while let Some(meta) = vertices.read_document::<DocumentMeta>().await? {
            let node = graph.add_node(meta.key);
            nodes.insert(meta.id, node);
        }
        vertices.close();

        let mut edges = self.all_edges().await?;
        while let Some(edge) = edges.read_document::<EdgeEnds>().await? {
            match (nodes.get(&edge.from), nodes.get(&edge.to)) {
                (Some(&from), Some(&to)) => {
                    graph.add_edge(from, to, edge.key);
                }
                _ => tracing::warn!(
                    edge = %edge.key,
                    from = %edge.from,
                    to = %edge.to,
                    "skipping edge with unknown endpoint"
                ),
            }
        }

        Ok((graph, nodes))
    }

    /// Render the stored graph in DOT format, one node per vertex labelled
    /// with its key
    pub async fn to_dot(&self) -> Result<String> {
        let (graph, _) = self.dot_graph().await?;
        Ok(render_dot(&graph))
    }
}

fn render_dot(graph: &ExportGraph) -> String {
    format!("{}", Dot::with_config(graph, &[Config::EdgeNoLabel]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_dot_statements() {
        let mut graph = ExportGraph::new();
        let a = graph.add_node("a".to_string());
        let b = graph.add_node("b".to_string());
        let c = graph.add_node("c".to_string());
        graph.add_edge(a, b, "ab".to_string());
        graph.add_edge(b, c, "bc".to_string());

        let dot = render_dot(&graph);
        assert!(dot.starts_with("digraph {"));
        assert_eq!(dot.lines().filter(|l| l.contains("label")).count(), 3);
        assert_eq!(dot.lines().filter(|l| l.contains("->")).count(), 2);
        assert!(dot.contains("0 -> 1"));
        assert!(dot
            .lines()
            .filter(|l| l.contains("->"))
            .all(|l| !l.contains("label")));
    }
}
