//! Readiness topology rules: source discovery, cycle rejection, port
//! sequencing, and name uniqueness.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use quickstream::{App, Error, FilterModule, InputContext, StartContext, NEXT_PORT};

/// Transform that counts start() calls and otherwise forwards nothing.
#[derive(Default)]
struct Probe {
    starts: AtomicU32,
}

impl FilterModule for Probe {
    fn start(&self, _ctx: &mut StartContext) -> i32 {
        self.starts.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        for p in 0..ctx.num_inputs() {
            let len = ctx.input_len(p);
            ctx.advance_input(p, len);
        }
        1
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "test probe")
    }
}

#[test]
fn test_no_sources_rejected() {
    let mut app = App::new();
    let sid = app.new_stream();
    let a = app.add_filter(Arc::new(Probe::default()), "a", &[]).unwrap();
    let b = app.add_filter(Arc::new(Probe::default()), "b", &[]).unwrap();

    // a → b → a: every filter is somebody's target, so nothing can
    // source the flow.
    app.connect(sid, a, b).unwrap();
    app.connect(sid, b, a).unwrap();

    assert!(matches!(app.stream_ready(sid), Err(Error::NoSources)));
}

#[test]
fn test_cycle_rejected_and_no_start_called() {
    let mut app = App::new();
    let sid = app.new_stream();
    let src_module = Arc::new(Probe::default());
    let a_module = Arc::new(Probe::default());
    let b_module = Arc::new(Probe::default());
    let src = app.add_filter(src_module.clone(), "src", &[]).unwrap();
    let a = app.add_filter(a_module.clone(), "a", &[]).unwrap();
    let b = app.add_filter(b_module.clone(), "b", &[]).unwrap();

    app.connect(sid, src, a).unwrap();
    app.connect(sid, a, b).unwrap();
    app.connect(sid, b, a).unwrap();

    assert!(matches!(app.stream_ready(sid), Err(Error::HasLoops)));

    // Failure before stage 5: nobody's start() ran.
    assert_eq!(src_module.starts.load(Ordering::Relaxed), 0);
    assert_eq!(a_module.starts.load(Ordering::Relaxed), 0);
    assert_eq!(b_module.starts.load(Ordering::Relaxed), 0);
}

#[test]
fn test_cycle_allowed_when_opted_in() {
    let mut app = App::new();
    let sid = app.new_stream();
    let src = app.add_filter(Arc::new(Probe::default()), "src", &[]).unwrap();
    let a = app.add_filter(Arc::new(Probe::default()), "a", &[]).unwrap();
    let b = app.add_filter(Arc::new(Probe::default()), "b", &[]).unwrap();

    app.connect(sid, src, a).unwrap();
    app.connect(sid, a, b).unwrap();
    app.connect(sid, b, a).unwrap();
    app.allow_loops(sid, true).unwrap();

    app.stream_ready(sid).unwrap();
    app.stream_stop(sid).unwrap();
}

#[test]
fn test_port_numbers_form_contiguous_sequences() {
    let mut app = App::new();
    let sid = app.new_stream();
    let src = app.add_filter(Arc::new(Probe::default()), "src", &[]).unwrap();
    let mid = app.add_filter(Arc::new(Probe::default()), "mid", &[]).unwrap();
    let sink = app.add_filter(Arc::new(Probe::default()), "sink", &[]).unwrap();

    // Mix explicit and NEXT_PORT numbering.
    app.plug(sid, src, 0, mid, NEXT_PORT).unwrap();
    app.plug(sid, src, NEXT_PORT, mid, NEXT_PORT).unwrap();
    app.plug(sid, mid, NEXT_PORT, sink, 0).unwrap();

    app.stream_ready(sid).unwrap();

    assert_eq!(app.filter_port_counts(src).unwrap(), (0, 2));
    assert_eq!(app.filter_port_counts(mid).unwrap(), (2, 1));
    assert_eq!(app.filter_port_counts(sink).unwrap(), (1, 0));

    // Resolved edges carry concrete, in-sequence port numbers.
    let conns = app.stream_connections(sid).unwrap();
    let src_ports: Vec<u32> = conns
        .iter()
        .filter(|(from, _, _, _)| from == "src")
        .map(|&(_, p, _, _)| p)
        .collect();
    assert_eq!(src_ports, vec![0, 1]);
    let mid_in_ports: Vec<u32> = conns
        .iter()
        .filter(|(_, _, to, _)| to == "mid")
        .map(|&(_, _, _, p)| p)
        .collect();
    assert_eq!(mid_in_ports, vec![0, 1]);

    app.stream_stop(sid).unwrap();
}

#[test]
fn test_bad_input_port_numbering_rejected() {
    let mut app = App::new();
    let sid = app.new_stream();
    let src = app.add_filter(Arc::new(Probe::default()), "src", &[]).unwrap();
    let sink = app.add_filter(Arc::new(Probe::default()), "sink", &[]).unwrap();

    // Two feeds into the same input port 0; port 1 is never covered.
    app.plug(sid, src, 0, sink, 0).unwrap();
    app.plug(sid, src, 1, sink, 0).unwrap();

    assert!(matches!(
        app.stream_ready(sid),
        Err(Error::BadPortNumbering(_))
    ));
}

#[test]
fn test_auto_names_get_suffixes_and_explicit_clash_fails() {
    let mut app = App::new();

    let a = app.load_filter("count", &[]).unwrap();
    let b = app.load_filter("count", &[]).unwrap();
    let c = app.load_filter("count", &[]).unwrap();
    assert_eq!(app.filter_name(a), Some("count"));
    assert_eq!(app.filter_name(b), Some("count-2"));
    assert_eq!(app.filter_name(c), Some("count-3"));

    let err = app.load_filter_named("count", Some("count-2"), &[]);
    assert!(matches!(err, Err(Error::NameClash(_))));
}

#[test]
fn test_ready_twice_is_misuse() {
    let mut app = App::new();
    let sid = app.new_stream();
    let src = app.add_filter(Arc::new(Probe::default()), "src", &[]).unwrap();
    let sink = app.add_filter(Arc::new(Probe::default()), "sink", &[]).unwrap();
    app.connect(sid, src, sink).unwrap();

    app.stream_ready(sid).unwrap();
    assert!(matches!(
        app.stream_ready(sid),
        Err(Error::LifecycleMisuse(_))
    ));
    app.stream_stop(sid).unwrap();
}
