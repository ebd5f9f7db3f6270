//! End-to-end: a source → pass-through → sink chain delivers the exact
//! byte sequence, with a worker pool and with the flow running inline
//! on the caller.

use std::sync::Arc;

use quickstream::filters::{CopyFilter, CountFilter, PassThroughFilter, SinkFilter};
use quickstream::App;

fn run_chain(threads: u32, count: u64) -> Vec<u64> {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(Arc::new(CountFilter::new(0, count)), "count", &[])
        .unwrap();
    let pass = app
        .add_filter(Arc::new(PassThroughFilter::default()), "passthrough", &[])
        .unwrap();
    let sink_module = Arc::new(SinkFilter::new());
    let sink = app.add_filter(sink_module.clone(), "sink", &[]).unwrap();

    app.connect(sid, src, pass).unwrap();
    app.connect(sid, pass, sink).unwrap();

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, threads).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    sink_module.collected_u64s()
}

#[test]
fn test_chain_copies_exact_sequence() {
    let values = run_chain(3, 1000);
    assert_eq!(values, (0..1000).collect::<Vec<u64>>());
}

#[test]
fn test_chain_single_worker() {
    let values = run_chain(1, 1000);
    assert_eq!(values, (0..1000).collect::<Vec<u64>>());
}

#[test]
fn test_chain_runs_inline_with_zero_threads() {
    // maxThreads == 0 means the caller is the one worker; the flow is
    // complete when launch returns.
    let values = run_chain(0, 257);
    assert_eq!(values, (0..257).collect::<Vec<u64>>());
}

#[test]
fn test_copy_transform_delivers_exact_sequence() {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(Arc::new(CountFilter::new(0, 1000)), "count", &[])
        .unwrap();
    // The registered builtin, the way the CLI would load it.
    let copy = app.load_filter("copy", &[]).unwrap();
    let sink_module = Arc::new(SinkFilter::new());
    let sink = app.add_filter(sink_module.clone(), "sink", &[]).unwrap();

    app.connect(sid, src, copy).unwrap();
    app.connect(sid, copy, sink).unwrap();

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, 3).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    // A real copy in the middle must not duplicate, drop, or corrupt
    // a single byte.
    assert_eq!(
        sink_module.collected_u64s(),
        (0..1000).collect::<Vec<u64>>()
    );
}

#[test]
fn test_copy_feeds_two_output_ports() {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(Arc::new(CountFilter::new(0, 300)), "count", &[])
        .unwrap();
    let copy = app
        .add_filter(Arc::new(CopyFilter::default()), "copy", &[])
        .unwrap();
    let a_module = Arc::new(SinkFilter::new());
    let b_module = Arc::new(SinkFilter::new());
    let sink_a = app.add_filter(a_module.clone(), "sinkA", &[]).unwrap();
    let sink_b = app.add_filter(b_module.clone(), "sinkB", &[]).unwrap();

    app.connect(sid, src, copy).unwrap();
    // Two separate output ports, one reader each.
    app.plug(sid, copy, 0, sink_a, 0).unwrap();
    app.plug(sid, copy, 1, sink_b, 0).unwrap();

    app.stream_ready(sid).unwrap();
    let (_, n_out) = app.filter_port_counts(copy).unwrap();
    assert_eq!(n_out, 2);

    app.stream_launch(sid, 3).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    let expected: Vec<u64> = (0..300).collect();
    assert_eq!(a_module.collected_u64s(), expected);
    assert_eq!(b_module.collected_u64s(), expected);
}

#[test]
fn test_flow_cycle_can_repeat() {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(Arc::new(CountFilter::new(0, 50)), "count", &[])
        .unwrap();
    let sink_module = Arc::new(SinkFilter::new());
    let sink = app.add_filter(sink_module.clone(), "sink", &[]).unwrap();
    app.connect(sid, src, sink).unwrap();

    for _ in 0..2 {
        app.stream_ready(sid).unwrap();
        app.stream_launch(sid, 2).unwrap();
        app.stream_wait(sid).unwrap();
        app.stream_stop(sid).unwrap();
    }

    // Two flow cycles, the counter restarts in start(): same run twice.
    let values = sink_module.collected_u64s();
    let expected: Vec<u64> = (0..50).chain(0..50).collect();
    assert_eq!(values, expected);
}
