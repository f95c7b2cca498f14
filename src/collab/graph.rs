//! Collaboration graph: who talks to whom, and how.

use serde::Serialize;

/// Relation carried by a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollabRelation {
    /// Sequential hand-off from one participant to the next.
    HandsOffTo,
    /// Coordinator supervises a specialist.
    Supervises,
    /// Specialist reports back to the coordinator.
    ReportsTo,
    /// Symmetric peer link.
    PeerCommunication,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollabEdge {
    pub from: String,
    pub to: String,
    pub relation: CollabRelation,
    /// Trust-derived weight in 0.0..=1.0.
    pub weight: f64,
}

/// Small write-once graph over participant worker ids.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollabGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<CollabEdge>,
}

impl CollabGraph {
    pub fn new(nodes: Vec<String>) -> Self {
        Self { nodes, edges: Vec::new() }
    }

    pub fn add_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        relation: CollabRelation,
        weight: f64,
    ) {
        self.edges.push(CollabEdge {
            from: from.into(),
            to: to.into(),
            relation,
            weight: weight.clamp(0.0, 1.0),
        });
    }

    /// Nodes reachable from `node` over one outgoing edge.
    pub fn successors(&self, node: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == node)
            .map(|e| e.to.as_str())
            .collect()
    }
}
