// merge.rs — Symbol extension for contiguous-memory operators
//
// Continuous-output operators write all outputs into one block, so their
// output symbols are unified. Continuous-input operators read one block, so
// the symbols of the producers feeding them are unified, but only when an
// upstream producer was actually laid out by buffer fusion (carries the
// buffer-fusion-offset attribute); otherwise the contiguity is realized by a
// copy and the producers keep separate blocks.
//
// Preconditions: `symbols` holds the provider's reference mapping for `graph`.
// Postconditions: returns the number of symbols merged away; re-running on the
//                 same inputs returns 0 and leaves the table unchanged.
// Failure modes: none.
// Side effects: mutates `symbols` in place.

use tracing::debug;

use crate::graph::{attrs, ComputeGraph};
use crate::id::Anchor;
use crate::symbol::SymbolTable;

/// Extend `symbols` with the contiguous-memory semantics of `graph`.
pub fn extend(graph: &ComputeGraph, symbols: &mut SymbolTable) -> usize {
    let before = symbols.len();
    for node in &graph.nodes {
        let Some(op) = node.op.as_ref() else {
            continue;
        };

        if op.is_continuous_output() && node.output_count() > 1 {
            let outputs: Vec<Anchor> = node.out_anchors().collect();
            if let Some(survivor) = symbols.merge(&outputs) {
                debug!(node = %node.name, %survivor, "continuous outputs share one symbol");
            }
        }

        if op.is_continuous_input() {
            let producers: Vec<Anchor> = node.in_links.iter().flatten().copied().collect();
            if producers.len() < 2 {
                continue;
            }
            let fused = producers.iter().any(|p| {
                graph
                    .node(p.node)
                    .and_then(|n| n.op.as_ref())
                    .is_some_and(|op| op.attr(attrs::BUFFER_FUSION_OFFSET).is_some())
            });
            if !fused {
                debug!(node = %node.name, "continuous input without buffer fusion, producers kept apart");
                continue;
            }
            if let Some(survivor) = symbols.merge(&producers) {
                debug!(node = %node.name, %survivor, "continuous input producers share one symbol");
            }
        }
    }
    before - symbols.len()
}
