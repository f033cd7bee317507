// analyzer.rs — Memory-reuse dependency analyzer
//
// Owns the symbol table of one graph snapshot and, once `init` succeeds, the
// dense index and reach sets the reuse oracle answers from.
//
//   new ──init()──▶ ready ──can_reuse / why_cannot_reuse (&self, any thread)
//                     │
//                     └──debug(self)──▶ DebugAnalyzer (dumps only)
//
// Preconditions: `symbols` is the provider's reference mapping for `graph`.
// Postconditions: after `Ok(())` from `init`, `is_ready()` holds and queries
//                 are read-only; after `Err`, the analyzer stays not ready.
// Failure modes: structural errors from `GraphIndex::build`.
// Side effects: `init` extends the owned symbol table in place.

use tracing::{debug, info, warn};

use crate::bitmap::LargeBitmap;
use crate::config::AnalyzerOptions;
use crate::error::{Error, Result};
use crate::graph::ComputeGraph;
use crate::id::NodeId;
use crate::index::GraphIndex;
use crate::merge;
use crate::reach::{self, ReachSets};
use crate::report;
use crate::reuse::ReuseOracle;
use crate::symbol::SymbolTable;

/// Frozen result of a successful `init`.
#[derive(Debug, Clone)]
struct Analysis {
    index: GraphIndex,
    reach: ReachSets,
}

#[derive(Debug, Clone)]
pub struct DependencyAnalyzer<'g> {
    graph: &'g ComputeGraph,
    symbols: SymbolTable,
    options: AnalyzerOptions,
    analysis: Option<Analysis>,
}

impl<'g> DependencyAnalyzer<'g> {
    pub fn new(graph: &'g ComputeGraph, symbols: SymbolTable, options: AnalyzerOptions) -> Self {
        DependencyAnalyzer {
            graph,
            symbols,
            options,
            analysis: None,
        }
    }

    /// Analyzer seeded with `SymbolTable::from_data_edges` and default options.
    pub fn with_data_edges(graph: &'g ComputeGraph) -> Self {
        Self::new(graph, SymbolTable::from_data_edges(graph), AnalyzerOptions::default())
    }

    /// Index the graph, extend symbols and compute reach sets.
    pub fn init(&mut self) -> Result<()> {
        self.analysis = None;
        let index = GraphIndex::build(self.graph)?;
        let merged = merge::extend(self.graph, &mut self.symbols);
        let reach = reach::compute(self.graph, &index, &self.symbols);
        info!(
            graph = %self.graph.name,
            nodes = index.len(),
            symbols = self.symbols.len(),
            merged,
            "dependency analysis ready"
        );
        let analysis = Analysis { index, reach };
        if self.options.trace_reach {
            for line in dump_reach(self.graph, &analysis).lines() {
                debug!("{line}");
            }
        }
        self.analysis = Some(analysis);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.analysis.is_some()
    }

    pub fn graph(&self) -> &'g ComputeGraph {
        self.graph
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn index(&self) -> Option<&GraphIndex> {
        self.analysis.as_ref().map(|a| &a.index)
    }

    pub fn reach_sets(&self) -> Option<&ReachSets> {
        self.analysis.as_ref().map(|a| &a.reach)
    }

    /// Reach set of `node`, if the analyzer is ready and the node indexed.
    pub fn reach_set(&self, node: NodeId) -> Option<&LargeBitmap> {
        let a = self.analysis.as_ref()?;
        let t = a.index.topo(node)?;
        (t < a.reach.len()).then(|| a.reach.get(t))
    }

    /// Whether `to` is provably ordered after `from`.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let Some(a) = self.analysis.as_ref() else {
            return false;
        };
        match (a.index.topo(from), a.index.topo(to)) {
            (Some(f), Some(t)) => a.reach.reaches(f, t),
            _ => false,
        }
    }

    fn oracle(&self) -> Option<ReuseOracle<'_>> {
        let a = self.analysis.as_ref()?;
        Some(ReuseOracle {
            graph: self.graph,
            index: &a.index,
            symbols: &self.symbols,
            reach: &a.reach,
            options: &self.options,
        })
    }

    /// Whether output `a_out` of `a` may reuse the block of output `b_out` of `b`.
    pub fn can_reuse(&self, a: NodeId, a_out: u32, b: NodeId, b_out: u32) -> bool {
        match self.oracle() {
            Some(oracle) => oracle.can_reuse(a, a_out, b, b_out),
            None => {
                warn!(graph = %self.graph.name, "reuse query before init, refusing");
                false
            }
        }
    }

    pub fn why_cannot_reuse(&self, a: NodeId, a_out: u32, b: NodeId, b_out: u32) -> String {
        match self.oracle() {
            Some(oracle) => oracle.why_cannot_reuse(a, a_out, b, b_out),
            None => format!("analyzer for '{}' is not initialized", self.graph.name),
        }
    }

    /// Name-based convenience for callers holding node names.
    pub fn can_reuse_by_name(&self, a: &str, a_out: u32, b: &str, b_out: u32) -> Result<bool> {
        let a = self.lookup(a)?;
        let b = self.lookup(b)?;
        Ok(self.can_reuse(a, a_out, b, b_out))
    }

    pub fn lookup(&self, name: &str) -> Result<NodeId> {
        self.graph
            .find_node(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    /// Re-run `init` with reach tracing and give up authoritative queries.
    pub fn debug(mut self) -> Result<DebugAnalyzer<'g>> {
        self.options.trace_reach = true;
        self.init()?;
        Ok(DebugAnalyzer { inner: self })
    }
}

/// Analyzer after the one-way debug transition. Only inspection is offered.
#[derive(Debug)]
pub struct DebugAnalyzer<'g> {
    inner: DependencyAnalyzer<'g>,
}

impl<'g> DebugAnalyzer<'g> {
    pub fn reach_set(&self, node: NodeId) -> Option<&LargeBitmap> {
        self.inner.reach_set(node)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.inner.symbols
    }

    /// Per-node reach sets, one line per node in topological order.
    pub fn dump(&self) -> String {
        match self.inner.analysis.as_ref() {
            Some(a) => dump_reach(self.inner.graph, a),
            None => String::new(),
        }
    }
}

fn dump_reach(graph: &ComputeGraph, analysis: &Analysis) -> String {
    report::reach_table(graph, &analysis.index, &analysis.reach)
}
