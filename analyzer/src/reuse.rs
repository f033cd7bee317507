// reuse.rs — Reuse verdicts and their explanations
//
// `a` may overwrite the block produced at `b:out` when every pending reader of
// that block is provably ordered before `a`, i.e. each reader's reach set
// contains `a` (or every co-producer of `a`'s block, when several operators
// write into it).
//
// Preconditions: `index`, `reach` and `symbols` describe the same graph.
// Postconditions: queries never mutate anything; invalid handles yield `false`.
// Failure modes: none; soft conditions are logged with `warn!`.
// Side effects: logging only.

use std::fmt::Write as _;

use tracing::warn;

use crate::bitmap::compress_ranges;
use crate::config::AnalyzerOptions;
use crate::graph::ComputeGraph;
use crate::id::{Anchor, NodeId};
use crate::index::GraphIndex;
use crate::reach::ReachSets;
use crate::symbol::SymbolTable;

/// Read-only view over a finished analysis.
#[derive(Debug, Clone, Copy)]
pub struct ReuseOracle<'a> {
    pub graph: &'a ComputeGraph,
    pub index: &'a GraphIndex,
    pub symbols: &'a SymbolTable,
    pub reach: &'a ReachSets,
    pub options: &'a AnalyzerOptions,
}

/// Ports of `b`'s block that must be proven past before reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    /// `b` has no symbol entry.
    Unknown,
    /// Retained consumer ports (possibly empty) and, when none remain, the
    /// producer ports of the block.
    Ports { consumers: Vec<Anchor>, producers: Vec<Anchor> },
}

impl Pending {
    fn checked(&self) -> &[Anchor] {
        match self {
            Pending::Unknown => &[],
            Pending::Ports { consumers, producers } => {
                if consumers.is_empty() {
                    producers
                } else {
                    consumers
                }
            }
        }
    }
}

impl<'a> ReuseOracle<'a> {
    /// Whether `a:a_out` may reuse the block of `b:b_out`.
    pub fn can_reuse(&self, a: NodeId, a_out: u32, b: NodeId, b_out: u32) -> bool {
        let (Some(ta), Some(_)) = (self.validate(a, a_out), self.validate(b, b_out)) else {
            warn!(a = a.0, a_out, b = b.0, b_out, "invalid reuse query");
            return false;
        };
        let b_port = Anchor::output(b, b_out);
        let pending = self.pending(ta, b_port);
        if pending == Pending::Unknown {
            warn!(
                port = %self.graph.anchor_label(b_port),
                verdict = self.options.reuse_without_symbol,
                "port has no symbol, using the configured default"
            );
            return self.options.reuse_without_symbol;
        }
        let required = self.required_before(a, a_out);
        pending
            .checked()
            .iter()
            .all(|p| self.missing(p.node, &required).is_empty())
    }

    /// Human-readable account of the `can_reuse` decision.
    pub fn why_cannot_reuse(&self, a: NodeId, a_out: u32, b: NodeId, b_out: u32) -> String {
        let ta = match (self.validate(a, a_out), self.validate(b, b_out)) {
            (Some(ta), Some(_)) => ta,
            (None, _) => return format!("invalid query: no output {a_out} on node {}", a.0),
            (_, None) => return format!("invalid query: no output {b_out} on node {}", b.0),
        };
        let a_port = Anchor::output(a, a_out);
        let b_port = Anchor::output(b, b_out);
        let a_label = self.graph.anchor_label(a_port);
        let b_label = self.graph.anchor_label(b_port);

        let pending = self.pending(ta, b_port);
        let Pending::Ports { consumers, producers } = &pending else {
            return format!(
                "{b_label} has no symbol; reuse by {a_label} is {} by default",
                if self.options.reuse_without_symbol { "allowed" } else { "refused" }
            );
        };

        let required = self.required_before(a, a_out);
        let mut failures = String::new();
        for port in pending.checked() {
            let missing = self.missing(port.node, &required);
            if missing.is_empty() {
                continue;
            }
            let reach = self
                .index
                .topo(port.node)
                .map(|t| compress_ranges(self.reach.get(t).iter()))
                .unwrap_or_default();
            let names: Vec<String> = missing
                .iter()
                .map(|&m| format!("'{}' ({})", self.graph.node_name(m), self.topo(m)))
                .collect();
            let _ = writeln!(
                failures,
                "  '{}' ({}) cannot reach {}; reach = [{}]",
                self.graph.node_name(port.node),
                self.topo(port.node),
                names.join(", "),
                reach
            );
        }

        if failures.is_empty() {
            return format!("{a_label} can reuse {b_label}");
        }

        let labels = |ports: &[Anchor]| {
            ports
                .iter()
                .map(|&p| self.graph.anchor_label(p))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut out = format!("{a_label} cannot reuse {b_label}\n");
        let _ = writeln!(out, "  consumers of {b_label}: [{}]", labels(consumers));
        if consumers.is_empty() {
            let _ = writeln!(out, "  producers to prove past: [{}]", labels(producers));
        }
        out.push_str(&failures);
        let _ = writeln!(out, "  a: {}", self.symbols.describe(a_port, self.graph));
        let _ = write!(out, "  b: {}", self.symbols.describe(b_port, self.graph));
        out
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn validate(&self, node: NodeId, out: u32) -> Option<usize> {
        let n = self.graph.node(node)?;
        if (out as usize) >= n.output_count() {
            return None;
        }
        let t = self.index.topo(node)?;
        (t < self.index.len() && self.index.node_id(t) == node).then_some(t)
    }

    fn topo(&self, node: NodeId) -> usize {
        self.index.topo(node).unwrap_or(usize::MAX)
    }

    fn pending(&self, evaluated: usize, b_port: Anchor) -> Pending {
        let Some(class) = self.symbols.class_of(b_port) else {
            return Pending::Unknown;
        };
        let consumers = class
            .iter()
            .copied()
            .filter(|p| p.is_input())
            .filter(|p| {
                self.index
                    .topo(p.node)
                    .is_some_and(|t| self.index.skip_reason(evaluated, t).is_none())
            })
            .collect();
        let producers = class.iter().copied().filter(|p| p.is_output()).collect();
        Pending::Ports { consumers, producers }
    }

    /// Nodes a reader must have been ordered before: every producer of `a`'s
    /// block when several nodes write into it, otherwise `a` alone.
    fn required_before(&self, a: NodeId, a_out: u32) -> Vec<NodeId> {
        let Some(class) = self.symbols.class_of(Anchor::output(a, a_out)) else {
            return vec![a];
        };
        let mut writers: Vec<NodeId> = class
            .iter()
            .filter(|p| p.is_output())
            .map(|p| p.node)
            .filter(|&n| {
                self.index.topo(n).is_some_and(|t| {
                    let m = self.index.meta(t);
                    !m.placeholder && !m.wrapper
                })
            })
            .collect();
        writers.sort_unstable();
        writers.dedup();
        if writers.len() > 1 {
            writers
        } else {
            vec![a]
        }
    }

    /// Required nodes absent from `reader`'s reach set.
    fn missing(&self, reader: NodeId, required: &[NodeId]) -> Vec<NodeId> {
        let Some(t) = self.index.topo(reader) else {
            return required.to_vec();
        };
        let reach = self.reach.get(t);
        required
            .iter()
            .copied()
            .filter(|&r| !self.index.topo(r).is_some_and(|rt| reach.get(rt)))
            .collect()
    }
}
