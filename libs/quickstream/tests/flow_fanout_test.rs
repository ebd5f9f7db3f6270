//! End-to-end: one output port feeding two readers delivers the full
//! ordered sequence to both, with the slower reader pacing the
//! producer.

use std::sync::Arc;

use quickstream::filters::{CountFilter, SinkFilter};
use quickstream::App;

#[test]
fn test_two_readers_see_the_same_sequence() {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(Arc::new(CountFilter::new(1, 100)), "count", &[])
        .unwrap();
    let a_module = Arc::new(SinkFilter::new());
    let b_module = Arc::new(SinkFilter::new());
    let sink_a = app.add_filter(a_module.clone(), "sinkA", &[]).unwrap();
    let sink_b = app.add_filter(b_module.clone(), "sinkB", &[]).unwrap();

    // Both readers on output port 0.
    app.plug(sid, src, 0, sink_a, 0).unwrap();
    app.plug(sid, src, 0, sink_b, 0).unwrap();

    app.stream_ready(sid).unwrap();
    let (_, n_out) = app.filter_port_counts(src).unwrap();
    assert_eq!(n_out, 1, "both edges share one output port");

    app.stream_launch(sid, 4).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    let expected: Vec<u64> = (1..=100).collect();
    assert_eq!(a_module.collected_u64s(), expected);
    assert_eq!(b_module.collected_u64s(), expected);
}

#[test]
fn test_slow_reader_does_not_lose_data() {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(Arc::new(CountFilter::new(0, 2000)), "count", &[])
        .unwrap();
    let fast = Arc::new(SinkFilter::new());
    let slow = Arc::new(SinkFilter::with_sleep(2));
    let sink_fast = app.add_filter(fast.clone(), "fast", &[]).unwrap();
    let sink_slow = app.add_filter(slow.clone(), "slow", &[]).unwrap();

    app.plug(sid, src, 0, sink_fast, 0).unwrap();
    app.plug(sid, src, 0, sink_slow, 0).unwrap();

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, 3).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    // The slowest reader dominates the producer; nobody drops bytes.
    let expected: Vec<u64> = (0..2000).collect();
    assert_eq!(fast.collected_u64s(), expected);
    assert_eq!(slow.collected_u64s(), expected);
}
