// id.rs — Arena identifiers for graph entities
//
// Nodes and subgraphs live in flat arenas inside `ComputeGraph`; these handles
// index those arenas. `Anchor` is the identity of a port and the key type of
// every symbol table. Topological ids are a separate, provider-assigned
// numbering resolved by `GraphIndex`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Arena handle of a node inside a `ComputeGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Arena handle of a (sub)graph inside a `ComputeGraph`. `GraphId(0)` is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl GraphId {
    pub const ROOT: GraphId = GraphId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// A port: (node, index, direction). Identity is the whole triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Anchor {
    pub node: NodeId,
    pub index: u32,
    pub dir: Direction,
}

impl Anchor {
    pub fn input(node: NodeId, index: u32) -> Self {
        Anchor {
            node,
            index,
            dir: Direction::In,
        }
    }

    pub fn output(node: NodeId, index: u32) -> Self {
        Anchor {
            node,
            index,
            dir: Direction::Out,
        }
    }

    pub fn is_input(&self) -> bool {
        self.dir == Direction::In
    }

    pub fn is_output(&self) -> bool {
        self.dir == Direction::Out
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.dir {
            Direction::In => "in",
            Direction::Out => "out",
        };
        write!(f, "n{}:{}{}", self.node.0, dir, self.index)
    }
}

/// Allocator for arena handles. Produces monotonically increasing ids in
/// allocation order, so builder output is deterministic.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: u32,
    next_graph: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn alloc_graph(&mut self) -> GraphId {
        let id = GraphId(self.next_graph);
        self.next_graph += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_monotonic() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_graph(), GraphId::ROOT);
        assert_eq!(ids.alloc_node(), NodeId(0));
        assert_eq!(ids.alloc_node(), NodeId(1));
        assert_eq!(ids.alloc_graph(), GraphId(1));
    }

    #[test]
    fn anchor_identity_includes_direction() {
        let a = Anchor::input(NodeId(3), 0);
        let b = Anchor::output(NodeId(3), 0);
        assert_ne!(a, b);
        assert_eq!(format!("{a}"), "n3:in0");
        assert_eq!(format!("{b}"), "n3:out0");
    }
}
