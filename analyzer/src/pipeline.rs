// pipeline.rs — Analysis state and pass orchestration
//
// Holds all pass artifacts for one graph and runs the minimal set of passes
// for a given terminal PassId.
//
// Preconditions: the graph and its initial symbol table are set in the state.
// Postconditions: artifacts for all required passes are populated, or an
//                 error names the failing pass.
// Failure modes: structural index errors, layout diagnostics, unknown nodes
//                in reuse queries.
// Side effects: calls on_pass_complete after each pass; logs pass timing.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::diag::{DiagLevel, Diagnostic};
use crate::error::Error;
use crate::graph::ComputeGraph;
use crate::index::GraphIndex;
use crate::layout;
use crate::merge;
use crate::pass::{required_passes, ArtifactId, PassId};
use crate::reach::{self, ReachSets};
use crate::reuse::ReuseOracle;
use crate::symbol::SymbolTable;

// ── Reuse queries ──────────────────────────────────────────────────────────

/// A `A:i,B:j` request: may output `i` of `A` reuse output `j` of `B`?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseQuery {
    pub a: String,
    pub a_out: u32,
    pub b: String,
    pub b_out: u32,
}

impl FromStr for ReuseQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::InvalidQuery(s.to_string());
        let port = |part: &str| -> Result<(String, u32), Error> {
            let (name, idx) = part.trim().rsplit_once(':').ok_or_else(bad)?;
            if name.is_empty() {
                return Err(bad());
            }
            let idx = idx.parse().map_err(|_| bad())?;
            Ok((name.to_string(), idx))
        };
        let (a, b) = s.split_once(',').ok_or_else(bad)?;
        let (a, a_out) = port(a)?;
        let (b, b_out) = port(b)?;
        Ok(ReuseQuery { a, a_out, b, b_out })
    }
}

impl fmt::Display for ReuseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}:{}", self.a, self.a_out, self.b, self.b_out)
    }
}

/// Answer to one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub query: ReuseQuery,
    pub allowed: bool,
    pub explanation: Option<String>,
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Fingerprints of the analyzed inputs.
///
/// `graph_hash`: SHA-256 of `ComputeGraph::canonical_json()`.
/// `symbols_fingerprint`: SHA-256 of the compact JSON of the initial symbol map.
/// `analyzer_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub graph_hash: [u8; 32],
    pub symbols_fingerprint: [u8; 32],
    pub analyzer_version: &'static str,
}

impl Provenance {
    /// Hex string of the graph hash (64 characters).
    pub fn graph_hash_hex(&self) -> String {
        bytes_to_hex(&self.graph_hash)
    }

    /// Hex string of the symbol fingerprint (64 characters).
    pub fn symbols_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.symbols_fingerprint)
    }

    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"graph_hash\": \"{}\",\n  \"symbols_fingerprint\": \"{}\",\n  \"analyzer_version\": \"{}\"\n}}\n",
            self.graph_hash_hex(),
            self.symbols_fingerprint_hex(),
            self.analyzer_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the graph and its initial symbol table.
pub fn compute_provenance(graph: &ComputeGraph, symbols: &SymbolTable) -> crate::error::Result<Provenance> {
    let graph_json = graph.canonical_json()?;
    let symbols_json = serde_json::to_string(&symbols.symbol_to_anchors())?;
    Ok(Provenance {
        graph_hash: sha256(&graph_json),
        symbols_fingerprint: sha256(&symbols_json),
        analyzer_version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Analysis state ─────────────────────────────────────────────────────────

/// All pass inputs and artifacts for one graph.
pub struct AnalysisState<'g> {
    pub graph: &'g ComputeGraph,
    pub config: Config,
    pub symbols: SymbolTable,
    pub queries: Vec<ReuseQuery>,
    /// Attach an explanation to every verdict, not only refusals.
    pub explain: bool,
    pub provenance: Provenance,
    pub index: Option<GraphIndex>,
    pub merged: usize,
    pub reach: Option<ReachSets>,
    pub verdicts: Vec<Verdict>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'g> AnalysisState<'g> {
    /// Fails only when the inputs cannot be serialized for fingerprinting.
    pub fn new(graph: &'g ComputeGraph, symbols: SymbolTable, config: Config) -> crate::error::Result<Self> {
        let provenance = compute_provenance(graph, &symbols)?;
        Ok(AnalysisState {
            graph,
            config,
            symbols,
            queries: Vec::new(),
            explain: false,
            provenance,
            index: None,
            merged: 0,
            reach: None,
            verdicts: Vec::new(),
            diagnostics: Vec::new(),
        })
    }

    /// Oracle over the current artifacts, once `reach` has run.
    pub fn oracle(&self) -> Option<ReuseOracle<'_>> {
        Some(ReuseOracle {
            graph: self.graph,
            index: self.index.as_ref()?,
            symbols: &self.symbols,
            reach: self.reach.as_ref()?,
            options: &self.config.analyzer,
        })
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// A pass failed. Layout diagnostics are also kept in `AnalysisState.diagnostics`.
#[derive(Debug, thiserror::Error)]
#[error("{failing_pass} failed: {source}")]
pub struct PipelineError {
    pub failing_pass: PassId,
    #[source]
    pub source: Error,
}

fn fail(pass: PassId, source: Error) -> PipelineError {
    PipelineError {
        failing_pass: pass,
        source,
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
pub fn run_pipeline(
    state: &mut AnalysisState<'_>,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass in required_passes(terminal) {
        let t = Instant::now();
        let diags = run_pass(state, pass)?;
        on_pass_complete(pass, &diags);
        info!(
            pass = %pass,
            elapsed_ms = t.elapsed().as_secs_f64() * 1000.0,
            "pass complete"
        );
        let first_error = diags.iter().find(|d| d.level == DiagLevel::Error).cloned();
        state.diagnostics.extend(diags);
        if let Some(d) = first_error {
            return Err(fail(pass, Error::Layout(d)));
        }
    }
    Ok(())
}

fn run_pass(state: &mut AnalysisState<'_>, pass: PassId) -> Result<Vec<Diagnostic>, PipelineError> {
    let graph = state.graph;
    match pass {
        PassId::CheckBeforeAssign => {
            return Ok(layout::before_assign_diagnostics(graph, &state.config.layout));
        }
        PassId::CheckAfterAssign => {
            return Ok(layout::after_assign_diagnostics(graph, &state.config.layout));
        }
        PassId::BuildIndex => {
            state.index = Some(GraphIndex::build(graph).map_err(|e| fail(pass, e))?);
        }
        PassId::MergeSymbols => {
            state.merged = merge::extend(graph, &mut state.symbols);
        }
        PassId::Reach => {
            let index = state
                .index
                .as_ref()
                .ok_or_else(|| fail(pass, Error::MissingArtifact(ArtifactId::Index)))?;
            state.reach = Some(reach::compute(graph, index, &state.symbols));
        }
        PassId::Query => {
            let oracle = state
                .oracle()
                .ok_or_else(|| fail(pass, Error::MissingArtifact(ArtifactId::ReachSets)))?;
            let mut verdicts = Vec::with_capacity(state.queries.len());
            for q in &state.queries {
                let a = graph
                    .find_node(&q.a)
                    .ok_or_else(|| fail(pass, Error::UnknownNode(q.a.clone())))?;
                let b = graph
                    .find_node(&q.b)
                    .ok_or_else(|| fail(pass, Error::UnknownNode(q.b.clone())))?;
                let allowed = oracle.can_reuse(a, q.a_out, b, q.b_out);
                let explanation = (state.explain || !allowed)
                    .then(|| oracle.why_cannot_reuse(a, q.a_out, b, q.b_out));
                verdicts.push(Verdict {
                    query: q.clone(),
                    allowed,
                    explanation,
                });
            }
            state.verdicts = verdicts;
        }
    }
    Ok(Vec::new())
}
