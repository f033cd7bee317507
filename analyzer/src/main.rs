use clap::Parser;
use std::path::{Path, PathBuf};

use mra::analyzer::DependencyAnalyzer;
use mra::config::Config;
use mra::error::Error;
use mra::graph::ComputeGraph;
use mra::pass::PassId;
use mra::pipeline::{run_pipeline, AnalysisState, ReuseQuery};
use mra::symbol::SymbolTable;
use mra::{dot, report};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Report,
    Reach,
    Dot,
    Matrix,
    Layout,
}

#[derive(Parser, Debug)]
#[command(
    name = "mra",
    version,
    about = "Memory-reuse dependency analyzer for scheduled multi-stream graphs"
)]
struct Cli {
    /// Input graph (JSON)
    graph: PathBuf,

    /// Initial symbol map (JSON: symbol -> anchors). Defaults to one symbol per data edge.
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Analyzer/layout configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Report)]
    emit: EmitStage,

    /// Reuse query `A:i,B:j` (repeatable)
    #[arg(long = "query")]
    queries: Vec<ReuseQuery>,

    /// Explain every verdict, not only refusals
    #[arg(long)]
    explain: bool,

    /// Re-run the analysis in debug mode and dump reach sets
    #[arg(long)]
    debug: bool,

    /// Padded-continuous alignment in bytes (overrides config)
    #[arg(long)]
    mem_align: Option<u64>,

    /// Check offsets inside ffts+ subgraphs too
    #[arg(long)]
    check_ffts_plus: bool,

    /// Verdict for ports without a symbol entry (overrides config)
    #[arg(long)]
    reuse_without_symbol: Option<bool>,

    /// Print analysis phases and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Exit code 2 for unreadable inputs, 1 for analysis failures.
fn exit_code(e: &Error) -> i32 {
    match e {
        Error::Io { .. } | Error::Json(_) | Error::InvalidQuery(_) => 2,
        _ => 1,
    }
}

fn fail(e: &Error) -> ! {
    eprintln!("mra: error: {}", e);
    std::process::exit(exit_code(e));
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // ── Load inputs ──
    let mut config = match &cli.config {
        Some(path) => Config::load(path).unwrap_or_else(|e| fail(&e)),
        None => Config::default(),
    };
    if let Some(align) = cli.mem_align {
        config.layout.mem_align = align;
    }
    if cli.check_ffts_plus {
        config.layout.skip_ffts_plus = false;
    }
    if let Some(v) = cli.reuse_without_symbol {
        config.analyzer.reuse_without_symbol = v;
    }

    let graph = read(&cli.graph)
        .and_then(|text| ComputeGraph::from_json(&text))
        .unwrap_or_else(|e| fail(&e));
    let symbols = match &cli.symbols {
        Some(path) => read(path)
            .and_then(|text| serde_json::from_str::<SymbolTable>(&text).map_err(Error::from))
            .unwrap_or_else(|e| fail(&e)),
        None => SymbolTable::from_data_edges(&graph),
    };
    tracing::debug!(graph = %graph.name, nodes = graph.nodes.len(), symbols = symbols.len(), "inputs loaded");

    if cli.debug {
        let analyzer = DependencyAnalyzer::new(&graph, symbols, config.analyzer.clone());
        match analyzer.debug() {
            Ok(dbg) => print!("{}", dbg.dump()),
            Err(e) => fail(&e),
        }
        return;
    }

    if let EmitStage::Dot = cli.emit {
        print!("{}", dot::emit_dot(&graph));
        return;
    }

    // ── Run passes ──
    let terminal = match cli.emit {
        EmitStage::Report => PassId::Query,
        EmitStage::Reach | EmitStage::Matrix => PassId::Reach,
        EmitStage::Layout => PassId::CheckAfterAssign,
        EmitStage::Dot => PassId::BuildIndex,
    };
    let mut state = AnalysisState::new(&graph, symbols, config).unwrap_or_else(|e| fail(&e));
    state.queries = cli.queries;
    state.explain = cli.explain;
    let result = run_pipeline(&mut state, terminal, |_, diags| {
        for d in diags {
            eprintln!("mra: {}", d);
        }
    });
    if let Err(e) = result {
        eprintln!("mra: {}", e);
        std::process::exit(exit_code(&e.source));
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Report => {
            if let Some(index) = state.index.as_ref() {
                let summary = report::Summary::new(&graph, index, state.symbols.len(), state.merged);
                print!("{}", summary.render());
            }
            println!("graph hash: {}", state.provenance.graph_hash_hex());
            println!("symbols fingerprint: {}", state.provenance.symbols_fingerprint_hex());
            for v in &state.verdicts {
                println!("{}: {}", v.query, if v.allowed { "reuse" } else { "no reuse" });
                if let Some(text) = &v.explanation {
                    for line in text.lines() {
                        println!("  {line}");
                    }
                }
            }
        }
        EmitStage::Reach => {
            if let (Some(index), Some(reach)) = (state.index.as_ref(), state.reach.as_ref()) {
                print!("{}", report::reach_table(&graph, index, reach));
            }
        }
        EmitStage::Matrix => {
            if let Some(oracle) = state.oracle() {
                print!("{}", report::reuse_matrix(&oracle));
            }
        }
        EmitStage::Layout => println!("layout ok"),
        EmitStage::Dot => {}
    }
}
