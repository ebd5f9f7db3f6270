//! Graphviz rendering of an app's filter graphs
//!
//! One cluster per stream, edges labelled `fromPort→toPort`. Detail
//! mode adds per-port max-write, threshold, and read-promise once a
//! stream is ready.

use std::fmt::Write as _;

use super::app::App;
use super::scheduler::RunFilter;
use super::stream::NEXT_PORT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DotDetail {
    Outline,
    Detail,
}

fn port_label(p: u32) -> String {
    if p == NEXT_PORT {
        "?".to_string()
    } else {
        p.to_string()
    }
}

fn node_detail(rf: &RunFilter) -> String {
    let mut label = String::new();
    for (o, out) in rf.outputs.iter().enumerate() {
        let _ = write!(label, "\\nout {o}: maxWrite={}", out.max_write);
        for r in &out.readers {
            let _ = write!(
                label,
                "\\n  reader in{}: threshold={} promise={}",
                r.input_port, r.threshold, r.promise
            );
        }
    }
    label
}

/// Render the whole app as a directed graph.
pub fn app_dot(app: &App, detail: DotDetail) -> String {
    let mut dot = String::from("digraph quickstream {\n");
    dot.push_str("  rankdir=LR;\n");
    dot.push_str("  node [shape=box];\n\n");

    let mut placed: Vec<usize> = Vec::new();

    for (si, stream) in app.streams.iter().enumerate() {
        let _ = writeln!(dot, "  subgraph cluster_{si} {{");
        let _ = writeln!(dot, "    label=\"stream {si}\";");

        for id in app.stream_participants(super::stream::StreamId(si)) {
            let Some(name) = app.filter_name(id) else {
                continue;
            };
            placed.push(id.0);
            let extra = if detail == DotDetail::Detail {
                detail_for(app, si, name)
            } else {
                String::new()
            };
            let _ = writeln!(dot, "    \"{name}\" [label=\"{name}{extra}\"];");
        }

        for c in &stream.connections {
            let (Some(from), Some(to)) = (app.filter_name(c.from), app.filter_name(c.to))
            else {
                continue;
            };
            let _ = writeln!(
                dot,
                "    \"{from}\" -> \"{to}\" [label=\"{}\u{2192}{}\"];",
                port_label(c.from_port),
                port_label(c.to_port)
            );
        }
        dot.push_str("  }\n");
    }

    // Loaded filters not yet connected anywhere.
    for id in app.filter_ids() {
        if !placed.contains(&id.0) {
            if let Some(name) = app.filter_name(id) {
                let _ = writeln!(dot, "  \"{name}\";");
            }
        }
    }

    dot.push_str("}\n");
    dot
}

fn detail_for(app: &App, si: usize, name: &str) -> String {
    let stream = &app.streams[si];
    if let Some(runtime) = &stream.runtime {
        for rf in &runtime.filters {
            if rf.name == name {
                return node_detail(rf);
            }
        }
    } else if let Some(core) = &stream.flow {
        return core.with_sched(|sched| {
            sched
                .filters()
                .iter()
                .find(|rf| rf.name == name)
                .map(|rf| node_detail(rf))
                .unwrap_or_default()
        });
    }
    String::new()
}
