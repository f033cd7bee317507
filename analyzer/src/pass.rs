// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the memory-planning passes, their dependency edges and the
// artifacts they produce. Used by the pipeline runner to compute the minimal
// pass subset for each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each analysis pass (graph loading happens before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    CheckBeforeAssign,
    BuildIndex,
    MergeSymbols,
    Reach,
    Query,
    CheckAfterAssign,
}

/// Machine-readable artifact identifiers. Each maps to a field of the
/// pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    StructureOk, // before-assign diagnostics
    Index,       // GraphIndex
    Symbols,     // extended SymbolTable
    ReachSets,   // ReachSets
    Verdicts,    // Vec<Verdict>
    OffsetsOk,   // after-assign diagnostics
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).name)
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about an analysis pass.
pub struct PassDescriptor {
    /// Human-readable name for logs.
    pub name: &'static str,
    /// Passes whose outputs this pass consumes.
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::CheckBeforeAssign => PassDescriptor {
            name: "check_before_assign",
            inputs: &[],
            outputs: &[ArtifactId::StructureOk],
            invariants: "special nodes declare consistent fan-in/fan-out",
        },
        PassId::BuildIndex => PassDescriptor {
            name: "build_index",
            inputs: &[],
            outputs: &[ArtifactId::Index],
            invariants: "dense unique topo ids, links recorded on both ends",
        },
        PassId::MergeSymbols => PassDescriptor {
            name: "merge_symbols",
            inputs: &[PassId::BuildIndex],
            outputs: &[ArtifactId::Symbols],
            invariants: "contiguous blocks share one symbol",
        },
        PassId::Reach => PassDescriptor {
            name: "reach",
            inputs: &[PassId::MergeSymbols],
            outputs: &[ArtifactId::ReachSets],
            invariants: "one reach set per node, wrappers exclude their bodies",
        },
        PassId::Query => PassDescriptor {
            name: "query",
            inputs: &[PassId::Reach],
            outputs: &[ArtifactId::Verdicts],
            invariants: "read-only over frozen reach sets and symbols",
        },
        PassId::CheckAfterAssign => PassDescriptor {
            name: "check_after_assign",
            inputs: &[PassId::CheckBeforeAssign],
            outputs: &[ArtifactId::OffsetsOk],
            invariants: "assigned offsets are contiguous and match expectations",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 6] = [
    PassId::CheckBeforeAssign,
    PassId::BuildIndex,
    PassId::MergeSymbols,
    PassId::Reach,
    PassId::Query,
    PassId::CheckAfterAssign,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_query_skips_layout() {
        let passes = required_passes(PassId::Query);
        assert_eq!(
            passes,
            vec![
                PassId::BuildIndex,
                PassId::MergeSymbols,
                PassId::Reach,
                PassId::Query
            ]
        );
        assert!(!passes.contains(&PassId::CheckBeforeAssign));
        assert!(!passes.contains(&PassId::CheckAfterAssign));
    }

    #[test]
    fn required_passes_layout_skips_reach() {
        let passes = required_passes(PassId::CheckAfterAssign);
        assert_eq!(
            passes,
            vec![PassId::CheckBeforeAssign, PassId::CheckAfterAssign]
        );
    }

    #[test]
    fn required_passes_build_index_is_minimal() {
        assert_eq!(required_passes(PassId::BuildIndex), vec![PassId::BuildIndex]);
    }

    #[test]
    fn display_uses_descriptor_name() {
        assert_eq!(PassId::MergeSymbols.to_string(), "merge_symbols");
        assert_eq!(PassId::CheckAfterAssign.to_string(), "check_after_assign");
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            let order = required_passes(*pass);
            for dep in desc.inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                let self_pos = order.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
