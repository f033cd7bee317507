// report.rs — Text renderings of analysis results
//
// Reach table (one line per node), reuse matrix (per output port, the ports
// whose blocks it may take over) and the CLI summary.
//
// Preconditions: the inputs describe the same graph.
// Postconditions: output is deterministic for a given graph and symbol table.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write as _;

use crate::graph::ComputeGraph;
use crate::id::Anchor;
use crate::index::GraphIndex;
use crate::reach::ReachSets;
use crate::reuse::ReuseOracle;

/// One line per node in topological order: id, name, stream, reach set.
pub fn reach_table(graph: &ComputeGraph, index: &GraphIndex, reach: &ReachSets) -> String {
    let mut out = String::new();
    for t in 0..index.len() {
        let m = index.meta(t);
        let _ = writeln!(
            out,
            "{t:>4} {:<24} stream {:>3} reach {}",
            graph.node_name(m.id),
            m.stream,
            reach.get(t)
        );
    }
    out
}

/// Every output port in topological order of its node.
pub fn output_ports(graph: &ComputeGraph, index: &GraphIndex) -> Vec<Anchor> {
    (0..index.len())
        .filter_map(|t| graph.node(index.node_id(t)))
        .flat_map(|n| n.out_anchors().collect::<Vec<_>>())
        .collect()
}

/// For each output port `a`, the ports `b` with `can_reuse(a, b)`.
pub fn reuse_matrix(oracle: &ReuseOracle<'_>) -> String {
    let ports = output_ports(oracle.graph, oracle.index);
    let width = ports
        .iter()
        .map(|&p| oracle.graph.anchor_label(p).len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for &a in &ports {
        let reusable: Vec<String> = ports
            .iter()
            .filter(|&&b| b != a && oracle.can_reuse(a.node, a.index, b.node, b.index))
            .map(|&b| oracle.graph.anchor_label(b))
            .collect();
        let list = if reusable.is_empty() {
            "-".to_string()
        } else {
            reusable.join(", ")
        };
        let _ = writeln!(out, "{:<width$} <- {}", oracle.graph.anchor_label(a), list);
    }
    out
}

/// Headline facts about an analyzed graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub graph: String,
    pub nodes: usize,
    pub wrappers: usize,
    pub streams: usize,
    pub sinks: usize,
    pub symbols: usize,
    pub merged: usize,
}

impl Summary {
    pub fn new(graph: &ComputeGraph, index: &GraphIndex, symbols: usize, merged: usize) -> Self {
        let mut streams: Vec<i64> = (0..index.len())
            .map(|t| index.meta(t).stream)
            .filter(|&s| s >= 0)
            .collect();
        streams.sort_unstable();
        streams.dedup();
        Summary {
            graph: graph.name.clone(),
            nodes: index.len(),
            wrappers: index.wrappers().len(),
            streams: streams.len(),
            sinks: index.sinks().len(),
            symbols,
            merged,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "graph '{}': {} nodes, {} wrappers, {} streams, {} sinks\nsymbols: {} ({} merged by contiguous operators)\n",
            self.graph, self.nodes, self.wrappers, self.streams, self.sinks, self.symbols, self.merged
        )
    }
}
