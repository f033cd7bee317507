// index.rs — Dense topological index over a ComputeGraph
//
// Flattens the arena into tables keyed by topological id: per-node metadata,
// successor/predecessor lists (data, control and same-stream order merged),
// same-stream neighbours, and the subgraph attachments of every wrapper node.
// Every bitmap in the analyzer is indexed by these ids.
//
// Preconditions: every node carries a unique topological id in `0..N`.
// Postconditions: `successors`/`predecessors` are mutually inverse, sorted
//                 and free of self-loops; wrappers are ordered root-level
//                 first, then by nesting depth.
// Failure modes: `ArenaIdMismatch`, `DuplicateId`, `InvalidTopoId`,
//                `MissingOpDescriptor`, `DanglingEdge`, `UnknownNode` (bad
//                subgraph, owner or control handle).
// Side effects: none.

use std::collections::BTreeMap;

use tracing::debug;

use crate::bitmap::LargeBitmap;
use crate::error::{Error, Result};
use crate::graph::ComputeGraph;
use crate::id::{Anchor, GraphId, NodeId};

// ── Public types ────────────────────────────────────────────────────────────

/// Immediate same-stream neighbours by ascending topological id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLink {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Per-node facts the analyzer consults, keyed by topological id.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub id: NodeId,
    pub stream: i64,
    pub wrapper: bool,
    pub placeholder: bool,
    pub sink: bool,
    pub batch_label: Option<String>,
}

impl NodeMeta {
    pub fn has_stream(&self) -> bool {
        self.stream >= 0
    }
}

/// One subgraph attached to a wrapper.
#[derive(Debug, Clone)]
pub struct SubgraphAttachment {
    pub graph: GraphId,
    /// Every node transitively contained in the subgraph.
    pub all_nodes: LargeBitmap,
    /// Immediate (non-nested) nodes of the subgraph.
    pub direct_nodes: Vec<usize>,
}

/// A wrapper node and its attachments.
#[derive(Debug, Clone)]
pub struct WrapperInfo {
    pub node: usize,
    /// Number of enclosing wrappers; 0 for root-level wrappers.
    pub depth: usize,
    pub attachments: Vec<SubgraphAttachment>,
}

impl WrapperInfo {
    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    /// Whether topological id `t` lives anywhere inside this wrapper's subgraphs.
    pub fn contains(&self, t: usize) -> bool {
        self.attachments.iter().any(|a| a.all_nodes.get(t))
    }
}

/// Why a candidate consumer is left out of an ordering proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Wrapper node; its reads happen inside its subgraphs.
    Wrapper,
    /// Graph-input placeholder; its stream assignment is unreliable.
    Placeholder,
    /// No stream assigned.
    NoStream,
    /// Belongs to another conditional-execution batch.
    BatchLabel,
}

/// The dense index.
#[derive(Debug, Clone)]
pub struct GraphIndex {
    meta: Vec<NodeMeta>,
    topo_of: Vec<usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    stream: Vec<StreamLink>,
    wrappers: Vec<WrapperInfo>,
    wrapper_slot: Vec<Option<usize>>,
    sinks: Vec<usize>,
}

// ── Construction ────────────────────────────────────────────────────────────

impl GraphIndex {
    pub fn build(graph: &ComputeGraph) -> Result<Self> {
        let n = graph.nodes.len();
        let mut by_topo: Vec<Option<NodeId>> = vec![None; n];
        let mut topo_of = vec![0usize; n];
        for (position, node) in graph.nodes.iter().enumerate() {
            if node.id.index() != position {
                return Err(Error::ArenaIdMismatch {
                    node: node.name.clone(),
                    id: node.id.0,
                    position,
                });
            }
            if node.topo_id < 0 || node.topo_id as usize >= n {
                return Err(Error::InvalidTopoId {
                    node: node.name.clone(),
                    topo_id: node.topo_id,
                    count: n,
                });
            }
            let t = node.topo_id as usize;
            if let Some(first) = by_topo[t] {
                return Err(Error::DuplicateId {
                    topo_id: node.topo_id,
                    first: graph.node_name(first).to_string(),
                    second: node.name.clone(),
                });
            }
            if node.op.is_none() {
                return Err(Error::MissingOpDescriptor {
                    node: node.name.clone(),
                });
            }
            by_topo[t] = Some(node.id);
            topo_of[node.id.index()] = t;
        }
        check_links(graph)?;
        check_subgraphs(graph)?;

        let meta: Vec<NodeMeta> = by_topo
            .iter()
            .flatten()
            .map(|&id| {
                let node = &graph.nodes[id.index()];
                let op = node.op.as_ref();
                NodeMeta {
                    id,
                    stream: op.map(|o| o.stream_id).unwrap_or(crate::graph::UNASSIGNED_STREAM),
                    wrapper: node.is_wrapper(),
                    placeholder: op.is_some_and(|o| o.is_placeholder()),
                    sink: op.is_some_and(|o| o.is_net_output()),
                    batch_label: op.and_then(|o| o.batch_label()).map(str::to_string),
                }
            })
            .collect();

        let stream = build_stream_order(&meta);

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (t, m) in meta.iter().enumerate() {
            let node = &graph.nodes[m.id.index()];
            let succ = &mut successors[t];
            for consumers in &node.out_links {
                succ.extend(consumers.iter().map(|c| topo_of[c.node.index()]));
            }
            succ.extend(node.ctrl_out.iter().map(|c| topo_of[c.index()]));
            succ.extend(stream[t].next);
            succ.sort_unstable();
            succ.dedup();
            succ.retain(|&s| s != t);
        }
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (t, succ) in successors.iter().enumerate() {
            for &s in succ {
                predecessors[s].push(t);
            }
        }

        let mut wrappers = Vec::new();
        for (t, m) in meta.iter().enumerate() {
            if !m.wrapper {
                continue;
            }
            let node = &graph.nodes[m.id.index()];
            let mut attachments = Vec::with_capacity(node.subgraphs.len());
            for &g in &node.subgraphs {
                let sub = graph.subgraph(g).ok_or_else(|| {
                    Error::UnknownNode(format!("subgraph {} of '{}'", g.0, node.name))
                })?;
                let mut all_nodes = LargeBitmap::new(n);
                for id in graph.all_nodes_in(g) {
                    all_nodes.set(topo_of[id.index()]);
                }
                let direct_nodes = sub.nodes.iter().map(|id| topo_of[id.index()]).collect();
                attachments.push(SubgraphAttachment {
                    graph: g,
                    all_nodes,
                    direct_nodes,
                });
            }
            wrappers.push(WrapperInfo {
                node: t,
                depth: nesting_depth(graph, m.id),
                attachments,
            });
        }
        wrappers.sort_by_key(|w| (w.depth, w.node));
        let mut wrapper_slot = vec![None; n];
        for (slot, w) in wrappers.iter().enumerate() {
            wrapper_slot[w.node] = Some(slot);
        }

        let sinks: Vec<usize> = (0..n).filter(|&t| meta[t].sink).collect();
        debug!(
            nodes = n,
            wrappers = wrappers.len(),
            sinks = sinks.len(),
            "graph index built"
        );

        Ok(GraphIndex {
            meta,
            topo_of,
            successors,
            predecessors,
            stream,
            wrappers,
            wrapper_slot,
            sinks,
        })
    }
}

/// Subgraph membership and wrapper handles must name arena entries.
fn check_subgraphs(graph: &ComputeGraph) -> Result<()> {
    for sub in &graph.graphs {
        for &id in &sub.nodes {
            if graph.node(id).is_none() {
                return Err(Error::UnknownNode(format!("node {} listed by subgraph '{}'", id.0, sub.name)));
            }
        }
    }
    for node in &graph.nodes {
        if graph.subgraph(node.owner).is_none() {
            return Err(Error::UnknownNode(format!("owner graph {} of '{}'", node.owner.0, node.name)));
        }
        for &g in &node.subgraphs {
            if graph.subgraph(g).is_none() {
                return Err(Error::UnknownNode(format!("subgraph {} of '{}'", g.0, node.name)));
            }
        }
    }
    Ok(())
}

/// Every link must be recorded on both of its ends.
fn check_links(graph: &ComputeGraph) -> Result<()> {
    let dangling = |from: Anchor, to: Anchor| Error::DanglingEdge {
        from: graph.anchor_label(from),
        to: graph.anchor_label(to),
    };
    for node in &graph.nodes {
        for (i, consumers) in node.out_links.iter().enumerate() {
            let from = Anchor::output(node.id, i as u32);
            for &to in consumers {
                if graph.producer(to) != Some(from) {
                    return Err(dangling(from, to));
                }
            }
        }
        for (i, producer) in node.in_links.iter().enumerate() {
            let to = Anchor::input(node.id, i as u32);
            let Some(from) = *producer else {
                continue;
            };
            let listed = graph
                .node(from.node)
                .and_then(|p| p.out_links.get(from.index as usize))
                .is_some_and(|consumers| consumers.contains(&to));
            if !listed {
                return Err(dangling(from, to));
            }
        }
        for &c in node.ctrl_out.iter().chain(&node.ctrl_in) {
            if graph.node(c).is_none() {
                return Err(Error::UnknownNode(format!(
                    "control peer {} of '{}'",
                    c.0, node.name
                )));
            }
        }
    }
    Ok(())
}

/// Bucket schedulable nodes by stream and link neighbours in ascending id.
/// Placeholders, wrappers and unassigned nodes do not take part: their stream
/// field is not an issue order.
fn build_stream_order(meta: &[NodeMeta]) -> Vec<StreamLink> {
    let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (t, m) in meta.iter().enumerate() {
        if m.has_stream() && !m.placeholder && !m.wrapper {
            buckets.entry(m.stream).or_default().push(t);
        }
    }
    let mut links = vec![StreamLink::default(); meta.len()];
    for ids in buckets.values() {
        for pair in ids.windows(2) {
            links[pair[0]].next = Some(pair[1]);
            links[pair[1]].prev = Some(pair[0]);
        }
    }
    links
}

/// Walk owner-graph → parent-node links to count enclosing wrappers.
fn nesting_depth(graph: &ComputeGraph, node: NodeId) -> usize {
    let mut depth = 0;
    let mut cur = node;
    while let Some(parent) = graph.parent_node_of(cur) {
        depth += 1;
        if depth > graph.nodes.len() {
            break;
        }
        cur = parent;
    }
    depth
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl GraphIndex {
    /// Node count N.
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn meta(&self, t: usize) -> &NodeMeta {
        &self.meta[t]
    }

    pub fn node_id(&self, t: usize) -> NodeId {
        self.meta[t].id
    }

    /// Topological id of an arena node, if it was indexed.
    pub fn topo(&self, id: NodeId) -> Option<usize> {
        self.topo_of.get(id.index()).copied()
    }

    pub fn successors(&self, t: usize) -> &[usize] {
        &self.successors[t]
    }

    pub fn predecessors(&self, t: usize) -> &[usize] {
        &self.predecessors[t]
    }

    pub fn stream_link(&self, t: usize) -> StreamLink {
        self.stream[t]
    }

    /// Wrappers, root-level first, then by nesting depth.
    pub fn wrappers(&self) -> &[WrapperInfo] {
        &self.wrappers
    }

    pub fn wrapper(&self, t: usize) -> Option<&WrapperInfo> {
        self.wrapper_slot[t].map(|slot| &self.wrappers[slot])
    }

    pub fn sinks(&self) -> &[usize] {
        &self.sinks
    }

    /// Skip policy for `candidate` when proving order relative to `evaluated`.
    pub fn skip_reason(&self, evaluated: usize, candidate: usize) -> Option<SkipReason> {
        let c = &self.meta[candidate];
        if c.wrapper {
            return Some(SkipReason::Wrapper);
        }
        if c.placeholder {
            return Some(SkipReason::Placeholder);
        }
        if !c.has_stream() {
            return Some(SkipReason::NoStream);
        }
        match (&self.meta[evaluated].batch_label, &c.batch_label) {
            (Some(a), Some(b)) if a != b => Some(SkipReason::BatchLabel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{attrs, op_types, AttrValue, GraphBuilder, OpDesc};

    fn op(ty: &str, stream: i64) -> OpDesc {
        OpDesc::new(ty).with_stream(stream)
    }

    #[test]
    fn duplicate_topo_id_fails() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        b.add_node(root, "a", op("Relu", 0));
        let c = b.add_node(root, "c", op("Relu", 0));
        b.set_topo_id(c, 0);
        b.add_node(root, "d", op("Relu", 0));
        let err = GraphIndex::build(&b.finish()).unwrap_err();
        match err {
            Error::DuplicateId { topo_id, first, second } => {
                assert_eq!(topo_id, 0);
                assert_eq!(first, "a");
                assert_eq!(second, "c");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_descriptor_fails() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        b.add_node(root, "a", op("Relu", 0));
        b.add_bare_node(root, "bare");
        let err = GraphIndex::build(&b.finish()).unwrap_err();
        assert!(matches!(err, Error::MissingOpDescriptor { node } if node == "bare"));
    }

    #[test]
    fn out_of_range_topo_id_fails() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let a = b.add_node(root, "a", op("Relu", 0));
        b.set_topo_id(a, 7);
        let err = GraphIndex::build(&b.finish()).unwrap_err();
        assert!(matches!(err, Error::InvalidTopoId { topo_id: 7, .. }));
    }

    #[test]
    fn one_sided_link_is_dangling() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let a = b.add_node(root, "a", op("Relu", 0));
        let c = b.add_node(root, "c", op("Relu", 0));
        b.connect(a, 0, c, 0);
        let mut g = b.finish();
        g.nodes[c.index()].in_links[0] = None;
        let err = GraphIndex::build(&g).unwrap_err();
        assert!(matches!(err, Error::DanglingEdge { .. }));
    }

    /// Two-node graph `a -> c` as JSON, edited by `edit` and loaded back.
    fn load_edited(edit: impl FnOnce(&mut serde_json::Value)) -> ComputeGraph {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let a = b.add_node(root, "a", op("Relu", 0));
        let c = b.add_node(root, "c", op("Relu", 1));
        b.connect(a, 0, c, 0);
        let text = b.finish().to_json_pretty().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        edit(&mut value);
        ComputeGraph::from_json(&value.to_string()).unwrap()
    }

    #[test]
    fn arena_id_out_of_range_fails() {
        let g = load_edited(|v| v["nodes"][1]["id"] = serde_json::json!(7));
        let err = GraphIndex::build(&g).unwrap_err();
        assert!(matches!(err, Error::ArenaIdMismatch { id: 7, position: 1, .. }), "{err}");
    }

    #[test]
    fn arena_id_shared_by_two_nodes_fails() {
        let g = load_edited(|v| v["nodes"][1]["id"] = serde_json::json!(0));
        let err = GraphIndex::build(&g).unwrap_err();
        assert_eq!(err.to_string(), "node 'c' carries arena id 0 at arena position 1");
    }

    #[test]
    fn subgraph_listing_unknown_node_fails() {
        let g = load_edited(|v| {
            v["graphs"][0]["nodes"]
                .as_array_mut()
                .unwrap()
                .push(serde_json::json!(42))
        });
        let err = GraphIndex::build(&g).unwrap_err();
        assert!(matches!(&err, Error::UnknownNode(what) if what.contains("42")), "{err}");
    }

    #[test]
    fn stream_order_links_by_ascending_id() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let d = b.add_node(root, "data", op(op_types::DATA, 0));
        let a = b.add_node(root, "a", op("Relu", 0));
        let x = b.add_node(root, "x", op("Relu", 1));
        let c = b.add_node(root, "c", op("Relu", 0));
        let u = b.add_node(root, "u", OpDesc::new("Relu"));
        let idx = GraphIndex::build(&b.finish()).unwrap();

        let t = |id: NodeId| idx.topo(id).unwrap();
        assert_eq!(idx.stream_link(t(d)), StreamLink::default());
        assert_eq!(idx.stream_link(t(a)).next, Some(t(c)));
        assert_eq!(idx.stream_link(t(c)).prev, Some(t(a)));
        assert_eq!(idx.stream_link(t(x)), StreamLink::default());
        assert_eq!(idx.stream_link(t(u)), StreamLink::default());
        assert_eq!(idx.successors(t(a)), &[t(c)]);
        assert_eq!(idx.predecessors(t(c)), &[t(a)]);
    }

    #[test]
    fn successors_merge_data_control_and_stream() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let a = b.add_node(root, "a", op("Relu", 0));
        let x = b.add_node(root, "x", op("Relu", 1));
        let y = b.add_node(root, "y", op("Relu", 2));
        let z = b.add_node(root, "z", op("Relu", 0));
        b.connect(a, 0, x, 0).connect(a, 0, y, 0).connect_control(a, y);
        let idx = GraphIndex::build(&b.finish()).unwrap();
        assert_eq!(idx.successors(0), &[1, 2, 3]);
        assert_eq!(idx.predecessors(2), &[0]);
        assert_eq!(idx.predecessors(z.index()), &[0]);
    }

    #[test]
    fn wrappers_are_ordered_root_first() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let outer = b.add_node(root, "outer", op("PartitionedCall", 0));
        let body = b.add_subgraph(outer, "body");
        let inner = b.add_node(body, "inner", op("If", 0));
        let then_g = b.add_subgraph(inner, "then");
        let leaf = b.add_node(then_g, "leaf", op("Relu", 0));
        let sink = b.add_node(body, "out", op(op_types::NET_OUTPUT, 0));
        let idx = GraphIndex::build(&b.finish()).unwrap();

        let ws = idx.wrappers();
        assert_eq!(ws.len(), 2);
        assert_eq!(ws[0].node, outer.index());
        assert!(!ws[0].is_nested());
        assert_eq!(ws[1].node, inner.index());
        assert_eq!(ws[1].depth, 1);

        let outer_att = &ws[0].attachments[0];
        assert_eq!(outer_att.direct_nodes, vec![inner.index(), sink.index()]);
        assert!(outer_att.all_nodes.get(leaf.index()));
        assert!(ws[0].contains(leaf.index()));
        assert!(!ws[1].contains(sink.index()));
        assert_eq!(idx.sinks(), &[sink.index()]);
        assert!(idx.wrapper(inner.index()).is_some());
        assert!(idx.wrapper(leaf.index()).is_none());
    }

    #[test]
    fn skip_policy() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let label = |s: &str| AttrValue::Str(s.to_string());
        let a = b.add_node(root, "a", op("Relu", 0).with_attr(attrs::BATCH_LABEL, label("b0")));
        let same = b.add_node(root, "same", op("Relu", 1).with_attr(attrs::BATCH_LABEL, label("b0")));
        let other = b.add_node(root, "other", op("Relu", 1).with_attr(attrs::BATCH_LABEL, label("b1")));
        let plain = b.add_node(root, "plain", op("Relu", 1));
        let data = b.add_node(root, "data", op(op_types::DATA, 1));
        let nostream = b.add_node(root, "ns", OpDesc::new("Relu"));
        let call = b.add_node(root, "call", op("PartitionedCall", 1));
        b.add_subgraph(call, "body");
        let idx = GraphIndex::build(&b.finish()).unwrap();

        let a = a.index();
        assert_eq!(idx.skip_reason(a, same.index()), None);
        assert_eq!(idx.skip_reason(a, plain.index()), None);
        assert_eq!(idx.skip_reason(a, other.index()), Some(SkipReason::BatchLabel));
        assert_eq!(idx.skip_reason(a, data.index()), Some(SkipReason::Placeholder));
        assert_eq!(idx.skip_reason(a, nostream.index()), Some(SkipReason::NoStream));
        assert_eq!(idx.skip_reason(a, call.index()), Some(SkipReason::Wrapper));
    }
}
