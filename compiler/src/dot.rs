// dot.rs — Graphviz DOT output for access dependency graphs
//
// Renders one access graph, or the per-multi-stage graphs of a whole
// instantiation, in DOT format. Edges that make a race under the given
// loop order are drawn red; members of multi-vertex cycles are drawn bold.
//
// Preconditions: every AccessId in the graph is registered in `metadata`
//                (unregistered ids render as `#n`).
// Postconditions: returns a valid, deterministic DOT string.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::access_graph::AccessDependencyGraph;
use crate::extent::LoopOrder;
use crate::id::AccessId;
use crate::iir::StencilInstantiation;
use crate::metadata::StencilMetadata;

/// Emit one access graph as a standalone `digraph`.
pub fn emit_graph_dot(
    graph: &AccessDependencyGraph,
    metadata: &StencilMetadata,
    name: &str,
    loop_order: LoopOrder,
) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(name)).unwrap();
    write_header(&mut buf, "    ");
    writeln!(buf).unwrap();
    write_graph_contents(&mut buf, graph, metadata, "", loop_order, "    ");
    writeln!(buf, "}}").unwrap();
    buf
}

/// Emit the merged graph of every multi-stage, one cluster per multi-stage.
pub fn emit_instantiation_dot(inst: &StencilInstantiation) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(&inst.name)).unwrap();
    write_header(&mut buf, "    ");

    for stencil in &inst.stencils {
        let sid = stencil.id.0;
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_s{sid} {{").unwrap();
        writeln!(buf, "        label=\"stencil {sid}\";").unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        for (ms_idx, ms) in stencil.multi_stages.iter().enumerate() {
            let prefix = format!("s{sid}_ms{ms_idx}_");
            writeln!(buf).unwrap();
            writeln!(buf, "        subgraph cluster_s{sid}_ms{ms_idx} {{").unwrap();
            writeln!(
                buf,
                "            label=\"multistage {ms_idx} ({})\";",
                ms.loop_order
            )
            .unwrap();
            writeln!(buf, "            style=dashed;").unwrap();
            writeln!(buf, "            color=gray70;").unwrap();
            write_graph_contents(
                &mut buf,
                &ms.dependency_graph(),
                &inst.metadata,
                &prefix,
                ms.loop_order,
                "            ",
            );
            writeln!(buf, "        }}").unwrap();
        }
        writeln!(buf, "    }}").unwrap();
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn write_header(buf: &mut String, indent: &str) {
    writeln!(buf, "{indent}rankdir=TB;").unwrap();
    writeln!(buf, "{indent}node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "{indent}edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
}

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

fn dot_node_id(prefix: &str, id: AccessId) -> String {
    format!("{prefix}a{}", id.0)
}

fn write_graph_contents(
    buf: &mut String,
    graph: &AccessDependencyGraph,
    metadata: &StencilMetadata,
    prefix: &str,
    loop_order: LoopOrder,
    indent: &str,
) {
    let in_cycle: BTreeSet<AccessId> = graph.cyclic_sccs().into_iter().flatten().collect();
    let inputs: BTreeSet<usize> = graph.input_vertices().into_iter().collect();

    for (v, vertex) in graph.vertices().iter().enumerate() {
        let id = dot_node_id(prefix, vertex.access_id);
        let label = metadata.display_name(vertex.access_id);
        let shape = if inputs.contains(&v) { "ellipse" } else { "box" };
        let fill = if metadata.is_version(vertex.access_id) {
            "lightyellow"
        } else {
            "lightblue"
        };
        let bold = if in_cycle.contains(&vertex.access_id) {
            ", penwidth=2"
        } else {
            ""
        };
        writeln!(
            buf,
            "{indent}{id} [shape={shape}, style=filled, fillcolor={fill}, label=\"{label}\"{bold}];"
        )
        .unwrap();
    }

    if graph.edge_count() > 0 {
        writeln!(buf).unwrap();
    }
    for edge in graph.edges() {
        let src = dot_node_id(prefix, graph.access_id(edge.from));
        let tgt = dot_node_id(prefix, graph.access_id(edge.to));
        let mut attrs = Vec::new();
        if !edge.extent.is_pointwise() {
            attrs.push(format!("label=\"{}\"", edge.extent));
        }
        if edge
            .extent
            .is_horizontal_stencil_or_counter_loop_order(loop_order)
        {
            attrs.push("color=red".to_string());
        }
        if attrs.is_empty() {
            writeln!(buf, "{indent}{src} -> {tgt};").unwrap();
        } else {
            writeln!(buf, "{indent}{src} -> {tgt} [{}];", attrs.join(", ")).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::{Extent, Interval};
    use crate::id::{StageId, StencilId};
    use crate::iir::{MultiStage, Stage, Statement, Stencil};

    fn hori_diff() -> (StencilMetadata, AccessDependencyGraph) {
        let mut md = StencilMetadata::new("hd");
        let u = md.add_field("u");
        let lap = md.add_temporary("lap");
        let mut g = AccessDependencyGraph::new();
        g.insert_statement(&Statement::assign(
            lap,
            [(u, Extent::from_offset(1, 0, 0)), (u, Extent::from_offset(-1, 0, 0))],
        ));
        g.insert_statement(&Statement::assign(u, [(lap, Extent::zero())]));
        (md, g)
    }

    #[test]
    fn valid_dot_structure() {
        let (md, g) = hori_diff();
        let dot = emit_graph_dot(&g, &md, "rc_hd", LoopOrder::Parallel);
        assert!(dot.starts_with("digraph rc_hd {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("label=\"u\""));
        assert!(dot.contains("label=\"lap\""));
    }

    #[test]
    fn hazard_edges_are_red_and_cycles_bold() {
        let (md, g) = hori_diff();
        let dot = emit_graph_dot(&g, &md, "rc", LoopOrder::Parallel);
        assert!(dot.contains("a1 -> a0 [label=\"[(-1,1),(0,0),(0,0)]\", color=red];"));
        assert!(dot.contains("a0 -> a1;"));
        assert_eq!(dot.matches("penwidth=2").count(), 2);
    }

    #[test]
    fn pure_inputs_are_ellipses() {
        let mut md = StencilMetadata::new("in");
        let (a, b) = (md.add_field("a"), md.add_field("b"));
        let mut g = AccessDependencyGraph::new();
        g.insert_statement(&Statement::assign(b, [(a, Extent::from_offset(1, 0, 0))]));
        let dot = emit_graph_dot(&g, &md, "in", LoopOrder::Parallel);
        assert!(dot.contains("a0 [shape=ellipse,"));
        assert!(dot.contains("a1 [shape=box,"));
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize("rc_my-stencil.cpp"), "rc_my_stencil_cpp");
        assert_eq!(sanitize("1st"), "g_1st");
    }

    #[test]
    fn instantiation_has_one_cluster_per_multistage() {
        let (md, _) = hori_diff();
        let (u, lap) = (AccessId(0), AccessId(1));
        let mut inst = StencilInstantiation::new("hd", md);
        inst.stencils.push(Stencil::new(
            StencilId(0),
            vec![
                MultiStage::new(
                    LoopOrder::Parallel,
                    vec![Stage::new(
                        StageId(0),
                        Interval::new(0, 9),
                        vec![Statement::assign(lap, [(u, Extent::from_offset(1, 0, 0))])],
                    )],
                ),
                MultiStage::new(
                    LoopOrder::Forward,
                    vec![Stage::new(
                        StageId(1),
                        Interval::new(0, 9),
                        vec![Statement::assign(u, [(lap, Extent::zero())])],
                    )],
                ),
            ],
        ));
        let dot = emit_instantiation_dot(&inst);
        assert!(dot.contains("subgraph cluster_s0 {"));
        assert!(dot.contains("subgraph cluster_s0_ms0 {"));
        assert!(dot.contains("label=\"multistage 1 (forward)\";"));
        assert!(dot.contains("s0_ms1_a0 -> s0_ms1_a1;"));
    }

    #[test]
    fn deterministic_output() {
        let (md, g) = hori_diff();
        assert_eq!(
            emit_graph_dot(&g, &md, "x", LoopOrder::Forward),
            emit_graph_dot(&g.clone(), &md, "x", LoopOrder::Forward)
        );
    }
}
