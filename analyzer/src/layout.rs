// layout.rs — Special-node layout checks around offset assignment
//
// Contiguous-memory operator families (continuous input/output, phony
// concat/split, buffer-pool collectives) impose structure that the allocator
// must honour. `check_before_assign` validates declared structure; `check`
// validates assigned byte offsets.
//
// Preconditions: `check` requires the allocator to have set `offset` on every
//                port of the checked nodes.
// Postconditions: `Ok(())` means no violation was found.
// Failure modes: the first violation, as `Error::Layout(Diagnostic)`.
// Side effects: none.

use tracing::debug;

use crate::config::LayoutOptions;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::error::{Error, Result};
use crate::graph::{attrs, ComputeGraph, Node, OpDesc, TensorDesc};

// ── Entry points ────────────────────────────────────────────────────────────

/// Structural validation before offsets exist. Fails on the first violation.
pub fn check_before_assign(graph: &ComputeGraph, options: &LayoutOptions) -> Result<()> {
    first_error(before_assign_diagnostics(graph, options))
}

/// Offset validation after assignment. Fails on the first violation.
pub fn check(graph: &ComputeGraph, options: &LayoutOptions) -> Result<()> {
    first_error(after_assign_diagnostics(graph, options))
}

fn first_error(diags: Vec<Diagnostic>) -> Result<()> {
    match diags.into_iter().next() {
        Some(d) => Err(Error::Layout(d)),
        None => Ok(()),
    }
}

/// Every structural violation, in node order.
pub fn before_assign_diagnostics(graph: &ComputeGraph, _options: &LayoutOptions) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for node in &graph.nodes {
        let Some(op) = node.op.as_ref() else {
            diags.push(Diagnostic::error(
                codes::E0207,
                &node.name,
                "node has no operator descriptor",
            ));
            continue;
        };
        check_structure(node, op, &mut diags);
    }
    diags
}

/// Every offset violation, in node order.
pub fn after_assign_diagnostics(graph: &ComputeGraph, options: &LayoutOptions) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for node in &graph.nodes {
        let Some(op) = node.op.as_ref() else {
            continue;
        };
        if !is_special(op) {
            continue;
        }
        if options.skip_ffts_plus && in_ffts_plus(graph, node) {
            debug!(node = %node.name, "inside ffts+ subgraph, offsets not checked");
            continue;
        }
        check_offsets(node, op, options, &mut diags);
    }
    diags
}

fn is_special(op: &OpDesc) -> bool {
    op.is_continuous_input()
        || op.is_continuous_output()
        || op.buffer_pool_id().is_some()
        || op.attr(attrs::EXPECTED_INPUT_OFFSETS).is_some()
        || op.attr(attrs::EXPECTED_OUTPUT_OFFSETS).is_some()
}

/// Whether any enclosing wrapper marks its subgraphs as ffts+.
fn in_ffts_plus(graph: &ComputeGraph, node: &Node) -> bool {
    let mut cur = node.id;
    for _ in 0..graph.nodes.len() {
        let Some(parent) = graph.parent_node_of(cur) else {
            return false;
        };
        let marked = graph
            .node(parent)
            .and_then(|p| p.op.as_ref())
            .is_some_and(|op| op.attr_bool(attrs::FFTS_PLUS_SUB_GRAPH));
        if marked {
            return true;
        }
        cur = parent;
    }
    false
}

// ── Before assignment ───────────────────────────────────────────────────────

fn check_structure(node: &Node, op: &OpDesc, diags: &mut Vec<Diagnostic>) {
    if op.is_padded_continuous_input() && op.is_nopadding_continuous_input() {
        diags.push(
            Diagnostic::error(codes::E0201, &node.name, "inputs are both padded and no-padding continuous")
                .with_attr(attrs::CONTINUOUS_INPUT),
        );
    }
    if op.is_padded_continuous_output() && op.is_nopadding_continuous_output() {
        diags.push(
            Diagnostic::error(codes::E0201, &node.name, "outputs are both padded and no-padding continuous")
                .with_attr(attrs::CONTINUOUS_OUTPUT),
        );
    }

    if op.is_phony_concat() {
        fan_check(
            node,
            op,
            attrs::CONCAT_INPUT_NUM,
            node.input_count(),
            codes::E0202,
            "inputs",
            diags,
        );
    }
    if op.is_phony_split() {
        fan_check(
            node,
            op,
            attrs::NUM_SPLIT,
            node.output_count(),
            codes::E0203,
            "outputs",
            diags,
        );
    }

    if op.is_continuous_input() {
        if node.input_count() == 0 {
            diags.push(Diagnostic::error(
                codes::E0204,
                &node.name,
                "continuous input node has no inputs",
            ));
        } else if let Some(i) = node.in_links.iter().position(Option::is_none) {
            diags.push(
                Diagnostic::error(
                    codes::E0204,
                    &node.name,
                    format!("continuous input {i} has no producer"),
                )
                .with_hint("every input of a contiguous block must be fed"),
            );
        }
    }
    if op.is_continuous_output() && node.output_count() == 0 {
        diags.push(Diagnostic::error(
            codes::E0205,
            &node.name,
            "continuous output node has no outputs",
        ));
    }
}

fn fan_check(
    node: &Node,
    op: &OpDesc,
    attr: &str,
    actual: usize,
    code: DiagCode,
    what: &str,
    diags: &mut Vec<Diagnostic>,
) {
    match op.attr_int(attr) {
        None => diags.push(
            Diagnostic::error(codes::E0206, &node.name, format!("declared number of {what} is missing"))
                .with_attr(attr),
        ),
        Some(declared) if declared < 0 || declared as usize != actual => diags.push(
            Diagnostic::error(
                code,
                &node.name,
                format!("declares {declared} {what} but has {actual}"),
            )
            .with_attr(attr),
        ),
        Some(_) => {}
    }
}

// ── After assignment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    Aligned,
    Exact,
}

fn check_offsets(node: &Node, op: &OpDesc, options: &LayoutOptions, diags: &mut Vec<Diagnostic>) {
    let before = diags.len();
    if op.is_nopadding_continuous_input() {
        contiguous(node, &op.inputs, "input", Padding::Exact, options, diags);
    } else if op.is_padded_continuous_input() {
        contiguous(node, &op.inputs, "input", Padding::Aligned, options, diags);
    }
    if op.is_nopadding_continuous_output() {
        contiguous(node, &op.outputs, "output", Padding::Exact, options, diags);
    } else if op.is_padded_continuous_output() || op.buffer_pool_id().is_some() {
        contiguous(node, &op.outputs, "output", Padding::Aligned, options, diags);
    }
    if diags.len() > before {
        return;
    }

    expected(node, op, attrs::EXPECTED_INPUT_OFFSETS, &op.inputs, "input", diags);
    expected(node, op, attrs::EXPECTED_OUTPUT_OFFSETS, &op.outputs, "output", diags);

    if op.is_phony_concat() || op.is_phony_split() {
        let (inp, out) = (op.inputs.first(), op.outputs.first());
        if let (Some(TensorDesc { offset: Some(i), .. }), Some(TensorDesc { offset: Some(o), .. })) = (inp, out) {
            if i != o {
                diags.push(
                    Diagnostic::error(
                        codes::E0304,
                        &node.name,
                        format!("output 0 at offset {o} does not alias input 0 at offset {i}"),
                    )
                    .with_hint("phony nodes must not copy; their block starts where their first port's does"),
                );
            }
        }
    }
}

fn contiguous(
    node: &Node,
    tensors: &[TensorDesc],
    what: &str,
    padding: Padding,
    options: &LayoutOptions,
    diags: &mut Vec<Diagnostic>,
) {
    let mut offsets = Vec::with_capacity(tensors.len());
    for (i, t) in tensors.iter().enumerate() {
        match t.offset {
            Some(off) => offsets.push(off),
            None => {
                diags.push(Diagnostic::error(
                    codes::E0301,
                    &node.name,
                    format!("{what} {i} has no assigned offset"),
                ));
                return;
            }
        }
    }
    for i in 1..tensors.len() {
        let span = match padding {
            Padding::Aligned => options.padded_size(tensors[i - 1].size),
            Padding::Exact => Some(tensors[i - 1].size),
        };
        let end = span
            .and_then(|s| i64::try_from(s).ok())
            .and_then(|s| offsets[i - 1].checked_add(s));
        let Some(want) = end else {
            diags.push(
                Diagnostic::error(
                    codes::E0302,
                    &node.name,
                    format!(
                        "{what} {} at offset {} with size {} ends past the addressable range",
                        i - 1,
                        offsets[i - 1],
                        tensors[i - 1].size
                    ),
                )
                .with_hint("offsets and sizes must fit in a signed 64-bit address"),
            );
            return;
        };
        if offsets[i] != want {
            diags.push(
                Diagnostic::error(
                    codes::E0302,
                    &node.name,
                    format!(
                        "{what} {i} at offset {} but {what} {} ends at {want}",
                        offsets[i],
                        i - 1
                    ),
                )
                .with_hint(match padding {
                    Padding::Aligned => format!("{what}s must be contiguous, each aligned to {} bytes", options.mem_align),
                    Padding::Exact => format!("{what}s must be back-to-back with no padding"),
                }),
            );
            return;
        }
    }
}

fn expected(
    node: &Node,
    op: &OpDesc,
    attr: &str,
    tensors: &[TensorDesc],
    what: &str,
    diags: &mut Vec<Diagnostic>,
) {
    let Some(want) = op.attr_ints(attr) else {
        return;
    };
    for (i, (&w, t)) in want.iter().zip(tensors).enumerate() {
        if t.offset != Some(w) {
            let got = t.offset.map_or_else(|| "unassigned".to_string(), |o| o.to_string());
            diags.push(
                Diagnostic::error(
                    codes::E0303,
                    &node.name,
                    format!("{what} {i} at {got}, expected {w}"),
                )
                .with_attr(attr),
            );
            return;
        }
    }
}
