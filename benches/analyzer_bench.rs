use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mra::graph::{attrs, op_types, ComputeGraph, GraphBuilder, OpDesc};
use mra::id::NodeId;
use mra::symbol::SymbolTable;
use mra::{layout, DependencyAnalyzer};

// KPI-aligned benchmark scenarios.
// Graphs are layered: every node reads from up to three nodes of the previous
// layer and runs on one of four streams, the shape memory planners see after
// multi-stream scheduling.

const STREAMS: i64 = 4;

/// `layers` × `width` nodes plus one NetOutput collecting the last layer.
fn generate_layered_graph(layers: usize, width: usize) -> ComputeGraph {
    let mut b = GraphBuilder::new(format!("layered_{layers}x{width}"));
    let root = b.root();
    let mut prev: Vec<NodeId> = Vec::new();
    for l in 0..layers {
        let mut layer = Vec::with_capacity(width);
        for w in 0..width {
            let stream = ((l * width + w) as i64) % STREAMS;
            let node = b.add_node(
                root,
                format!("n{l}_{w}"),
                OpDesc::new("Conv").with_stream(stream).with_outputs(&[4096]),
            );
            let inputs = prev.iter().skip(w).take(3);
            for (slot, &src) in inputs.enumerate() {
                b.connect(src, 0, node, slot as u32);
            }
            layer.push(node);
        }
        prev = layer;
    }
    let out = b.add_node(root, "out", OpDesc::new(op_types::NET_OUTPUT).with_stream(0));
    for (i, &src) in prev.iter().enumerate() {
        b.connect(src, 0, out, i as u32);
    }
    b.finish()
}

/// A chain of fused concats: each concat reads `fan` producers laid out by
/// buffer fusion, so every concat merges `fan` symbols.
fn generate_concat_graph(concats: usize, fan: usize) -> ComputeGraph {
    let mut b = GraphBuilder::new(format!("concat_{concats}x{fan}"));
    let root = b.root();
    let mut last = None;
    for c in 0..concats {
        let concat = b.add_node(
            root,
            format!("concat{c}"),
            OpDesc::new("ConcatD")
                .with_stream(0)
                .with_flag(attrs::CONTINUOUS_INPUT)
                .with_outputs(&[4096]),
        );
        for p in 0..fan {
            let producer = b.add_node(
                root,
                format!("p{c}_{p}"),
                OpDesc::new("Relu")
                    .with_stream((p as i64) % STREAMS)
                    .with_attr(attrs::BUFFER_FUSION_OFFSET, mra::graph::AttrValue::Int(0))
                    .with_outputs(&[1024]),
            );
            if let Some(prev) = last {
                b.connect(prev, 0, producer, 0);
            }
            b.connect(producer, 0, concat, p as u32);
        }
        last = Some(concat);
    }
    b.finish()
}

fn ready(graph: &ComputeGraph) -> DependencyAnalyzer<'_> {
    let mut an = DependencyAnalyzer::with_data_edges(graph);
    an.init().expect("benchmark graph must analyze");
    an
}

// ── KPI: analyzer init ──────────────────────────────────────────────────────

fn bench_kpi_init_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/init_latency");
    for &(layers, width) in &[(16usize, 8usize), (64, 16), (128, 32)] {
        let graph = generate_layered_graph(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(layers * width),
            &graph,
            |b, graph| {
                b.iter_batched(
                    || SymbolTable::from_data_edges(graph),
                    |symbols| {
                        let mut an = DependencyAnalyzer::new(graph, symbols, Default::default());
                        an.init().expect("init");
                        black_box(an.is_ready())
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

fn bench_kpi_symbol_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/symbol_merge");
    for &(concats, fan) in &[(16usize, 4usize), (64, 8)] {
        let graph = generate_concat_graph(concats, fan);
        group.bench_with_input(
            BenchmarkId::from_parameter(concats * fan),
            &graph,
            |b, graph| {
                b.iter_batched(
                    || SymbolTable::from_data_edges(graph),
                    |mut symbols| black_box(mra::merge::extend(graph, &mut symbols)),
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

// ── KPI: queries ────────────────────────────────────────────────────────────

fn bench_kpi_query_latency(c: &mut Criterion) {
    let graph = generate_layered_graph(64, 16);
    let an = ready(&graph);
    let ports: Vec<NodeId> = graph.nodes.iter().filter(|n| n.output_count() > 0).map(|n| n.id).collect();

    c.bench_function("kpi/can_reuse_single", |b| {
        let (a, x) = (ports[ports.len() - 2], ports[0]);
        b.iter(|| black_box(an.can_reuse(black_box(a), 0, black_box(x), 0)))
    });

    c.bench_function("kpi/can_reuse_row", |b| {
        let a = ports[ports.len() / 2];
        b.iter(|| {
            ports
                .iter()
                .filter(|&&x| x != a && an.can_reuse(a, 0, x, 0))
                .count()
        })
    });

    c.bench_function("kpi/why_cannot_reuse", |b| {
        let (a, x) = (ports[1], ports[0]);
        b.iter(|| black_box(an.why_cannot_reuse(a, 0, x, 0)))
    });
}

// ── KPI: layout checks ──────────────────────────────────────────────────────

fn bench_kpi_layout_check(c: &mut Criterion) {
    let graph = generate_concat_graph(64, 8);
    let options = Default::default();
    c.bench_function("kpi/layout_before_assign", |b| {
        b.iter(|| black_box(layout::before_assign_diagnostics(&graph, &options).len()))
    });
}

criterion_group!(
    benches,
    bench_kpi_init_latency,
    bench_kpi_symbol_merge,
    bench_kpi_query_latency,
    bench_kpi_layout_check,
);
criterion_main!(benches);
