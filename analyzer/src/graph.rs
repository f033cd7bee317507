// graph.rs — Arena graph model consumed by the reuse analyzer
//
// A `ComputeGraph` is the scheduled graph handed over by the graph provider:
// every node of the root graph and of every nested subgraph lives in one flat
// arena, addressed by `NodeId`. Links are stored on both ends (producer anchor
// per input, consumer anchors per output) so traversal never chases pointers.
//
// Preconditions: none (plain data).
// Postconditions: `GraphBuilder` keeps producer/consumer links symmetric and
//                 keeps `OpDesc` tensor lists as long as the link lists.
// Failure modes: JSON (de)serialization errors surface as `Error::Json`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::{Anchor, Direction, GraphId, IdAllocator, NodeId};

/// Stream id sentinel for nodes without a stream assignment.
pub const UNASSIGNED_STREAM: i64 = -1;

/// Operator type tags the analyzer and checker interpret.
pub mod op_types {
    pub const NET_OUTPUT: &str = "NetOutput";
    pub const DATA: &str = "Data";
    pub const REF_DATA: &str = "RefData";
    pub const AIPP_DATA: &str = "AippData";
    pub const PHONY_CONCAT: &str = "PhonyConcat";
    pub const PHONY_SPLIT: &str = "PhonySplit";

    /// Graph-input placeholders: their stream assignment is not an issue order.
    pub const PLACEHOLDERS: [&str; 3] = [DATA, REF_DATA, AIPP_DATA];
}

/// Attribute names read from `OpDesc::attrs`.
pub mod attrs {
    pub const CONTINUOUS_INPUT: &str = "continuous_input";
    pub const CONTINUOUS_OUTPUT: &str = "continuous_output";
    pub const NOPADDING_CONTINUOUS_INPUT: &str = "_no_padding_continuous_input";
    pub const NOPADDING_CONTINUOUS_OUTPUT: &str = "_no_padding_continuous_output";
    pub const BATCH_LABEL: &str = "_batch_label";
    pub const BUFFER_FUSION_OFFSET: &str = "_output_offset_for_buffer_fusion";
    pub const PARENT_NODE_INDEX: &str = "_parent_node_index";
    pub const FFTS_PLUS_SUB_GRAPH: &str = "_ffts_plus_sub_graph";
    pub const BUFFER_POOL_ID: &str = "buffer_pool_id";
    pub const EXPECTED_INPUT_OFFSETS: &str = "_expected_input_offsets";
    pub const EXPECTED_OUTPUT_OFFSETS: &str = "_expected_output_offsets";
    /// Declared fan-in of a phony concat.
    pub const CONCAT_INPUT_NUM: &str = "N";
    /// Declared fan-out of a phony split.
    pub const NUM_SPLIT: &str = "num_split";
}

// ── Op descriptor ───────────────────────────────────────────────────────────

/// An attribute value. Untagged in JSON: `true`, `3`, `[0, 512]`, `"batch_0"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    IntList(Vec<i64>),
    Str(String),
}

/// Tensor metadata for one port. `offset` is set by the allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl TensorDesc {
    pub fn sized(size: u64) -> Self {
        TensorDesc { size, offset: None }
    }
}

fn unassigned_stream() -> i64 {
    UNASSIGNED_STREAM
}

/// Operator descriptor: type tag, stream, attributes and port tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    pub op_type: String,
    #[serde(default = "unassigned_stream")]
    pub stream_id: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub inputs: Vec<TensorDesc>,
    #[serde(default)]
    pub outputs: Vec<TensorDesc>,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        OpDesc {
            op_type: op_type.into(),
            stream_id: UNASSIGNED_STREAM,
            attrs: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_stream(mut self, stream_id: i64) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn with_flag(self, name: &str) -> Self {
        self.with_attr(name, AttrValue::Bool(true))
    }

    pub fn with_inputs(mut self, sizes: &[u64]) -> Self {
        self.inputs = sizes.iter().map(|&s| TensorDesc::sized(s)).collect();
        self
    }

    pub fn with_outputs(mut self, sizes: &[u64]) -> Self {
        self.outputs = sizes.iter().map(|&s| TensorDesc::sized(s)).collect();
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// `true` for `Bool(true)` or a non-zero `Int`.
    pub fn attr_bool(&self, name: &str) -> bool {
        match self.attrs.get(name) {
            Some(AttrValue::Bool(b)) => *b,
            Some(AttrValue::Int(i)) => *i != 0,
            _ => false,
        }
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(AttrValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attrs.get(name) {
            Some(AttrValue::IntList(v)) => Some(v),
            _ => None,
        }
    }

    pub fn has_valid_stream(&self) -> bool {
        self.stream_id >= 0
    }

    pub fn batch_label(&self) -> Option<&str> {
        self.attr_str(attrs::BATCH_LABEL)
    }

    pub fn is_placeholder(&self) -> bool {
        op_types::PLACEHOLDERS.contains(&self.op_type.as_str())
    }

    pub fn is_net_output(&self) -> bool {
        self.op_type == op_types::NET_OUTPUT
    }

    pub fn is_phony_concat(&self) -> bool {
        self.op_type == op_types::PHONY_CONCAT
    }

    pub fn is_phony_split(&self) -> bool {
        self.op_type == op_types::PHONY_SPLIT
    }

    /// Inputs must be padded-contiguous.
    pub fn is_padded_continuous_input(&self) -> bool {
        self.attr_bool(attrs::CONTINUOUS_INPUT)
    }

    /// Outputs must be padded-contiguous.
    pub fn is_padded_continuous_output(&self) -> bool {
        self.attr_bool(attrs::CONTINUOUS_OUTPUT)
    }

    /// Inputs must be back-to-back with no padding. Implied by phony concat.
    pub fn is_nopadding_continuous_input(&self) -> bool {
        self.attr_bool(attrs::NOPADDING_CONTINUOUS_INPUT) || self.is_phony_concat()
    }

    /// Outputs must be back-to-back with no padding. Implied by phony split.
    pub fn is_nopadding_continuous_output(&self) -> bool {
        self.attr_bool(attrs::NOPADDING_CONTINUOUS_OUTPUT) || self.is_phony_split()
    }

    pub fn is_continuous_input(&self) -> bool {
        self.is_padded_continuous_input() || self.is_nopadding_continuous_input()
    }

    pub fn is_continuous_output(&self) -> bool {
        self.is_padded_continuous_output() || self.is_nopadding_continuous_output()
    }

    pub fn buffer_pool_id(&self) -> Option<i64> {
        self.attr_int(attrs::BUFFER_POOL_ID)
    }
}

// ── Nodes and subgraphs ─────────────────────────────────────────────────────

/// A node in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Provider-assigned topological id; dense and unique across the whole arena.
    pub topo_id: i64,
    pub owner: GraphId,
    /// `None` models a node whose operator descriptor is missing.
    pub op: Option<OpDesc>,
    /// Producer output anchor per input port.
    #[serde(default)]
    pub in_links: Vec<Option<Anchor>>,
    /// Consumer input anchors per output port.
    #[serde(default)]
    pub out_links: Vec<Vec<Anchor>>,
    #[serde(default)]
    pub ctrl_in: Vec<NodeId>,
    #[serde(default)]
    pub ctrl_out: Vec<NodeId>,
    /// Attached subgraphs; non-empty makes this a wrapper node.
    #[serde(default)]
    pub subgraphs: Vec<GraphId>,
}

impl Node {
    pub fn op_type(&self) -> &str {
        self.op.as_ref().map(|op| op.op_type.as_str()).unwrap_or("")
    }

    pub fn is_wrapper(&self) -> bool {
        !self.subgraphs.is_empty()
    }

    pub fn input_count(&self) -> usize {
        self.in_links.len()
    }

    pub fn output_count(&self) -> usize {
        self.out_links.len()
    }

    pub fn out_anchor(&self, index: u32) -> Anchor {
        Anchor::output(self.id, index)
    }

    pub fn in_anchor(&self, index: u32) -> Anchor {
        Anchor::input(self.id, index)
    }

    pub fn out_anchors(&self) -> impl Iterator<Item = Anchor> + '_ {
        (0..self.out_links.len() as u32).map(move |i| Anchor::output(self.id, i))
    }
}

/// A graph level: the root or a subgraph attached to a wrapper node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgraph {
    pub id: GraphId,
    pub name: String,
    /// Wrapper node owning this subgraph; `None` for the root.
    pub parent_node: Option<NodeId>,
    /// Immediate (non-nested) nodes.
    pub nodes: Vec<NodeId>,
}

/// The complete scheduled graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeGraph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub graphs: Vec<Subgraph>,
}

impl ComputeGraph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    pub fn subgraph(&self, id: GraphId) -> Option<&Subgraph> {
        self.graphs.get(id.index())
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    /// Node name, or a placeholder for handles outside the arena.
    pub fn node_name(&self, id: NodeId) -> &str {
        self.node(id).map(|n| n.name.as_str()).unwrap_or("<unknown>")
    }

    /// `name:out0` / `name:in1` label for diagnostics.
    pub fn anchor_label(&self, anchor: Anchor) -> String {
        let dir = match anchor.dir {
            Direction::In => "in",
            Direction::Out => "out",
        };
        format!("{}:{}{}", self.node_name(anchor.node), dir, anchor.index)
    }

    /// Producer output anchor of an input anchor.
    pub fn producer(&self, input: Anchor) -> Option<Anchor> {
        let node = self.node(input.node)?;
        node.in_links.get(input.index as usize).copied().flatten()
    }

    /// Wrapper node owning the graph `node` lives in, if any.
    pub fn parent_node_of(&self, node: NodeId) -> Option<NodeId> {
        let owner = self.node(node)?.owner;
        self.subgraph(owner)?.parent_node
    }

    /// Every node transitively contained in `graph`, including nested subgraphs.
    pub fn all_nodes_in(&self, graph: GraphId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![graph];
        let mut seen = vec![false; self.graphs.len()];
        while let Some(g) = stack.pop() {
            let Some(sub) = self.subgraph(g) else {
                continue;
            };
            if std::mem::replace(&mut seen[g.index()], true) {
                continue;
            }
            for &id in &sub.nodes {
                out.push(id);
                if let Some(node) = self.node(id) {
                    stack.extend(node.subgraphs.iter().copied());
                }
            }
        }
        out
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compact JSON used as the fingerprint input.
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for ComputeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ComputeGraph '{}' ({} nodes, {} graphs)",
            self.name,
            self.nodes.len(),
            self.graphs.len()
        )?;
        for sub in &self.graphs {
            match sub.parent_node {
                Some(parent) => writeln!(
                    f,
                    "  subgraph '{}' of '{}': {} nodes",
                    sub.name,
                    self.node_name(parent),
                    sub.nodes.len()
                )?,
                None => writeln!(f, "  root '{}': {} nodes", sub.name, sub.nodes.len())?,
            }
        }
        Ok(())
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Incremental construction of a `ComputeGraph`.
///
/// Topological ids default to insertion order, so adding producers before
/// consumers (and wrappers before their subgraph bodies) yields a valid order.
#[derive(Debug)]
pub struct GraphBuilder {
    ids: IdAllocator,
    graph: ComputeGraph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut ids = IdAllocator::new();
        let root = ids.alloc_graph();
        GraphBuilder {
            ids,
            graph: ComputeGraph {
                name: name.clone(),
                nodes: Vec::new(),
                graphs: vec![Subgraph {
                    id: root,
                    name,
                    parent_node: None,
                    nodes: Vec::new(),
                }],
            },
        }
    }

    pub fn root(&self) -> GraphId {
        GraphId::ROOT
    }

    /// Attach a new, empty subgraph to `parent`, turning it into a wrapper.
    pub fn add_subgraph(&mut self, parent: NodeId, name: impl Into<String>) -> GraphId {
        let id = self.ids.alloc_graph();
        self.graph.graphs.push(Subgraph {
            id,
            name: name.into(),
            parent_node: Some(parent),
            nodes: Vec::new(),
        });
        if let Some(node) = self.graph.node_mut(parent) {
            node.subgraphs.push(id);
        }
        id
    }

    /// Add a node. Port lists are sized from the descriptor's tensor lists.
    pub fn add_node(&mut self, graph: GraphId, name: impl Into<String>, op: OpDesc) -> NodeId {
        let inputs = op.inputs.len();
        let outputs = op.outputs.len();
        let id = self.push_node(graph, name.into(), Some(op));
        let node = &mut self.graph.nodes[id.index()];
        node.in_links = vec![None; inputs];
        node.out_links = vec![Vec::new(); outputs];
        id
    }

    /// Add a node lacking an operator descriptor.
    pub fn add_bare_node(&mut self, graph: GraphId, name: impl Into<String>) -> NodeId {
        self.push_node(graph, name.into(), None)
    }

    fn push_node(&mut self, graph: GraphId, name: String, op: Option<OpDesc>) -> NodeId {
        let id = self.ids.alloc_node();
        self.graph.nodes.push(Node {
            id,
            name,
            topo_id: id.0 as i64,
            owner: graph,
            op,
            in_links: Vec::new(),
            out_links: Vec::new(),
            ctrl_in: Vec::new(),
            ctrl_out: Vec::new(),
            subgraphs: Vec::new(),
        });
        if let Some(sub) = self.graph.graphs.get_mut(graph.index()) {
            sub.nodes.push(id);
        }
        id
    }

    /// Link `src:out[src_out]` to `dst:in[dst_in]`, growing port lists as needed.
    pub fn connect(&mut self, src: NodeId, src_out: u32, dst: NodeId, dst_in: u32) -> &mut Self {
        let from = Anchor::output(src, src_out);
        let to = Anchor::input(dst, dst_in);
        if let Some(node) = self.graph.node_mut(src) {
            let idx = src_out as usize;
            if node.out_links.len() <= idx {
                node.out_links.resize(idx + 1, Vec::new());
            }
            node.out_links[idx].push(to);
            if let Some(op) = node.op.as_mut() {
                if op.outputs.len() <= idx {
                    op.outputs.resize(idx + 1, TensorDesc::default());
                }
            }
        }
        if let Some(node) = self.graph.node_mut(dst) {
            let idx = dst_in as usize;
            if node.in_links.len() <= idx {
                node.in_links.resize(idx + 1, None);
            }
            node.in_links[idx] = Some(from);
            if let Some(op) = node.op.as_mut() {
                if op.inputs.len() <= idx {
                    op.inputs.resize(idx + 1, TensorDesc::default());
                }
            }
        }
        self
    }

    pub fn connect_control(&mut self, src: NodeId, dst: NodeId) -> &mut Self {
        if let Some(node) = self.graph.node_mut(src) {
            node.ctrl_out.push(dst);
        }
        if let Some(node) = self.graph.node_mut(dst) {
            node.ctrl_in.push(src);
        }
        self
    }

    /// Override the provider-assigned topological id.
    pub fn set_topo_id(&mut self, node: NodeId, topo_id: i64) -> &mut Self {
        if let Some(n) = self.graph.node_mut(node) {
            n.topo_id = topo_id;
        }
        self
    }

    pub fn finish(self) -> ComputeGraph {
        self.graph
    }
}
