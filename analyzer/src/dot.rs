// dot.rs — Graphviz DOT output for scheduled compute graphs
//
// Renders a ComputeGraph with one cluster per subgraph (nested clusters for
// nested wrappers), node labels carrying op type, stream and topological id,
// solid data edges labelled `out:in`, and dashed control edges.
//
// Preconditions: none; dangling handles are skipped.
// Postconditions: returns a DOT string; output order follows the arena order.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::graph::{ComputeGraph, Node, Subgraph, UNASSIGNED_STREAM};
use crate::id::{GraphId, NodeId};

/// Emit the compute graph as a Graphviz DOT string.
pub fn emit_dot(graph: &ComputeGraph) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, graph);
    buf
}

fn write_dot(buf: &mut String, graph: &ComputeGraph) -> fmt::Result {
    writeln!(buf, "digraph {} {{", sanitize(&graph.name))?;
    writeln!(buf, "    rankdir=TB;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    if let Some(root) = graph.subgraph(GraphId::ROOT) {
        writeln!(buf)?;
        write_graph_contents(buf, graph, root, "    ")?;
    }

    writeln!(buf)?;
    for node in &graph.nodes {
        for (i, consumers) in node.out_links.iter().enumerate() {
            for c in consumers {
                writeln!(
                    buf,
                    "    {} -> {} [label=\"{}:{}\"];",
                    dot_node_id(node.id),
                    dot_node_id(c.node),
                    i,
                    c.index
                )?;
            }
        }
        for &c in &node.ctrl_out {
            writeln!(
                buf,
                "    {} -> {} [style=dashed, color=gray50];",
                dot_node_id(node.id),
                dot_node_id(c)
            )?;
        }
    }

    writeln!(buf, "}}")
}

/// Write the nodes of one graph level, recursing into wrapper subgraphs.
fn write_graph_contents(
    buf: &mut String,
    graph: &ComputeGraph,
    level: &Subgraph,
    indent: &str,
) -> fmt::Result {
    for &id in &level.nodes {
        let Some(node) = graph.node(id) else {
            continue;
        };
        writeln!(buf, "{indent}{} [{}];", dot_node_id(id), node_attrs(node))?;
        for &sub_id in &node.subgraphs {
            let Some(sub) = graph.subgraph(sub_id) else {
                continue;
            };
            writeln!(buf, "{indent}subgraph cluster_g{} {{", sub_id.0)?;
            writeln!(buf, "{indent}    label=\"{} ({})\";", escape(&sub.name), escape(&node.name))?;
            writeln!(buf, "{indent}    style=dashed;")?;
            writeln!(buf, "{indent}    color=gray70;")?;
            write_graph_contents(buf, graph, sub, &format!("{indent}    "))?;
            writeln!(buf, "{indent}}}")?;
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() || s.starts_with(|c: char| c.is_ascii_digit()) {
        format!("g_{s}")
    } else {
        s
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn dot_node_id(node: NodeId) -> String {
    format!("n{}", node.0)
}

/// DOT attributes for a node: shape and colour by role, label with schedule facts.
fn node_attrs(node: &Node) -> String {
    let op = node.op.as_ref();
    let (shape, color) = match op {
        None => ("box", "white"),
        Some(_) if node.is_wrapper() => ("box3d", "lightsalmon"),
        Some(op) if op.is_net_output() => ("doubleoctagon", "lightgreen"),
        Some(op) if op.is_placeholder() => ("ellipse", "lightyellow"),
        Some(op) if op.is_continuous_input() || op.is_continuous_output() => ("box", "plum"),
        Some(_) => ("box", "lightblue"),
    };
    let stream = match op.map_or(UNASSIGNED_STREAM, |o| o.stream_id) {
        s if s < 0 => "s-".to_string(),
        s => format!("s{s}"),
    };
    format!(
        "shape={shape}, style=filled, fillcolor={color}, label=\"{}\\n{} {} #{}\"",
        escape(&node.name),
        escape(node.op_type()),
        stream,
        node.topo_id
    )
}
