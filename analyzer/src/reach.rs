// reach.rs — Happens-after reachability over a scheduled graph
//
// Computes, for every node X, the set of nodes provably ordered after X:
//
//   reach(X) = ⋃ { {Y} ∪ reach(Y) | Y ∈ successors(X), Y not skipped for X }
//
// where successors merge data consumers, control successors and the next node
// on X's stream. Evaluation is memoized and driven by an explicit stack seeded
// from the graph sinks, so depth is bounded by heap, not by the call stack.
// Subgraph nesting is then folded in by the cross-subgraph extension.
//
// Preconditions: `index` was built from the same graph as `symbols`.
// Postconditions: one bitmap of length N per node; a wrapper's set holds none
//                 of its own subgraph nodes.
// Failure modes: none; cycles and disconnected fragments are logged and
//                resolved conservatively.
// Side effects: none.

use tracing::{debug, warn};

use crate::bitmap::LargeBitmap;
use crate::graph::ComputeGraph;
use crate::index::{GraphIndex, SkipReason};
use crate::symbol::SymbolTable;

/// Reach sets keyed by topological id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachSets {
    sets: Vec<LargeBitmap>,
}

impl ReachSets {
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, t: usize) -> &LargeBitmap {
        &self.sets[t]
    }

    /// Whether `to` is provably ordered after `from`.
    pub fn reaches(&self, from: usize, to: usize) -> bool {
        self.sets.get(from).is_some_and(|s| s.get(to))
    }
}

/// Compute reach sets for the whole graph.
pub fn compute(graph: &ComputeGraph, index: &GraphIndex, symbols: &SymbolTable) -> ReachSets {
    let mut sets = propagate(index);
    extend_across_subgraphs(graph, index, symbols, &mut sets);
    ReachSets { sets }
}

// ── Propagation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Open,
    Done,
}

/// Successors of `x` that take part in `x`'s reach computation.
///
/// Wrappers stay in: they are the ordering points the cross-subgraph
/// extension hangs subgraph bodies off. Their own reads are excluded later,
/// when the reuse oracle filters consumer ports.
fn contributing(index: &GraphIndex, x: usize) -> impl Iterator<Item = usize> + '_ {
    index
        .successors(x)
        .iter()
        .copied()
        .filter(move |&y| match index.skip_reason(x, y) {
            None | Some(SkipReason::Wrapper) => true,
            Some(_) => false,
        })
}

fn seeds(index: &GraphIndex) -> Vec<usize> {
    if !index.sinks().is_empty() {
        return index.sinks().to_vec();
    }
    if index.is_empty() {
        return Vec::new();
    }
    warn!("graph has no NetOutput, seeding from the highest topological id");
    vec![index.len() - 1]
}

/// `sets[dst] |= sets[src]` for two distinct indices.
fn union_into(sets: &mut [LargeBitmap], dst: usize, src: usize) {
    if dst == src {
        return;
    }
    if dst < src {
        let (lo, hi) = sets.split_at_mut(src);
        lo[dst].union_with(&hi[0]);
    } else {
        let (lo, hi) = sets.split_at_mut(dst);
        hi[0].union_with(&lo[src]);
    }
}

fn propagate(index: &GraphIndex) -> Vec<LargeBitmap> {
    let n = index.len();
    let mut sets = vec![LargeBitmap::new(n); n];
    let mut state = vec![Visit::New; n];
    let mut discovered = vec![false; n];
    let mut roots = seeds(index);
    let mut fallback = n;
    let mut fragments = 0usize;

    loop {
        for root in std::mem::take(&mut roots) {
            // Everything ordered before the root, nearest first.
            let mut order = Vec::new();
            let mut stack = vec![root];
            while let Some(x) = stack.pop() {
                if std::mem::replace(&mut discovered[x], true) {
                    continue;
                }
                order.push(x);
                stack.extend(index.predecessors(x).iter().copied().filter(|&p| !discovered[p]));
            }
            for x in order {
                resolve(index, &mut sets, &mut state, x);
            }
        }

        while fallback > 0 && state[fallback - 1] != Visit::New {
            fallback -= 1;
        }
        if fallback == 0 {
            break;
        }
        fragments += 1;
        debug!(seed = fallback - 1, "unvisited fragment, continuing from its highest id");
        roots.push(fallback - 1);
    }

    if fragments > 0 {
        warn!(fragments, "graph has fragments unreachable from its sinks");
    }
    sets
}

/// Post-order walk over contributing successors; every node's set is final
/// once its successors' sets are.
fn resolve(index: &GraphIndex, sets: &mut [LargeBitmap], state: &mut [Visit], root: usize) {
    if state[root] != Visit::New {
        return;
    }
    // (node, expanded): the expanded entry sits below the node's successors.
    let mut stack = vec![(root, false)];
    while let Some((x, expanded)) = stack.pop() {
        if expanded {
            for y in contributing(index, x) {
                sets[x].set(y);
                if state[y] == Visit::Done {
                    union_into(sets, x, y);
                } else {
                    warn!(from = x, to = y, "ordering cycle, successor reach set is partial");
                }
            }
            state[x] = Visit::Done;
            continue;
        }
        if state[x] != Visit::New {
            continue;
        }
        state[x] = Visit::Open;
        stack.push((x, true));
        for y in contributing(index, x) {
            if state[y] == Visit::New {
                stack.push((y, false));
            }
        }
    }
}

// ── Cross-subgraph extension ────────────────────────────────────────────────

/// Whether any output of `z` shares a symbol with any output of `w`.
fn shares_output_symbol(graph: &ComputeGraph, index: &GraphIndex, symbols: &SymbolTable, z: usize, w: usize) -> bool {
    let (Some(zn), Some(wn)) = (graph.node(index.node_id(z)), graph.node(index.node_id(w))) else {
        return false;
    };
    zn.out_anchors()
        .any(|za| wn.out_anchors().any(|wa| symbols.same_symbol(za, wa)))
}

fn extend_across_subgraphs(
    graph: &ComputeGraph,
    index: &GraphIndex,
    symbols: &SymbolTable,
    sets: &mut [LargeBitmap],
) {
    let n = index.len();

    // A wrapper never reaches into its own subgraph bodies from the outside.
    for w in index.wrappers() {
        for att in &w.attachments {
            sets[w.node].subtract(&att.all_nodes);
        }
    }

    // External predecessors of a wrapper precede every branch body.
    for w in index.wrappers() {
        let body: Vec<usize> = w
            .attachments
            .iter()
            .flat_map(|a| a.direct_nodes.iter().copied())
            .collect();
        for y in 0..n {
            if y == w.node || w.contains(y) || !sets[y].get(w.node) {
                continue;
            }
            for &z in &body {
                sets[y].set(z);
            }
        }
    }

    // Body nodes precede whatever follows the wrapper, and the wrapper itself
    // unless the body node produces the wrapper's own output block.
    for w in index.wrappers() {
        let after = sets[w.node].clone();
        for att in &w.attachments {
            for &z in &att.direct_nodes {
                sets[z].union_with(&after);
                if !shares_output_symbol(graph, index, symbols, z, w.node) {
                    sets[z].set(w.node);
                }
            }
        }
    }
}
