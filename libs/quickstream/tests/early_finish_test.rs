//! End-to-end: a filter that bows out of the flow early. Its queued
//! jobs disappear, downstream sees the flushing flag on the final
//! deliveries and is called until it has consumed everything, and the
//! flow drains to completion. Also covers stop_sources() drain.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use quickstream::filters::CountFilter;
use quickstream::{App, FilterModule, InputContext};

/// Sink that records the flushing flag alongside the bytes, and
/// consumes only a little per call so flushed data takes several calls
/// to drain.
#[derive(Default)]
struct NibblingSink {
    bytes: Mutex<Vec<u8>>,
    saw_flushing: AtomicBool,
}

impl FilterModule for NibblingSink {
    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        if ctx.is_flushing(0) {
            self.saw_flushing.store(true, Ordering::Relaxed);
        }
        let len = ctx.input_len(0).min(64);
        if len > 0 {
            self.bytes
                .lock()
                .extend_from_slice(&ctx.input(0)[..len]);
            ctx.advance_input(0, len);
        }
        0
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "test sink")
    }
}

#[test]
fn test_early_finish_flushes_downstream() {
    let mut app = App::new();
    let sid = app.new_stream();

    // 96 values = 768 bytes, emitted in one input() call that also
    // finishes the source.
    let src = app
        .add_filter(Arc::new(CountFilter::new(0, 96)), "count", &[])
        .unwrap();
    let sink_module = Arc::new(NibblingSink::default());
    let sink = app.add_filter(sink_module.clone(), "sink", &[]).unwrap();
    app.connect(sid, src, sink).unwrap();

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, 2).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    // Everything arrived even though each call nibbled 64 bytes.
    let bytes = sink_module.bytes.lock().clone();
    assert_eq!(bytes.len(), 96 * 8);
    let values: Vec<u64> = bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(values, (0..96).collect::<Vec<u64>>());

    // The final deliveries carried the flushing flag.
    assert!(sink_module.saw_flushing.load(Ordering::Relaxed));
}

/// Source that would run forever; only stop_sources() ends it.
struct EndlessSource {
    calls: AtomicU32,
}

impl FilterModule for EndlessSource {
    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let buf = ctx.output_buffer(0, 256);
        buf.fill(0xab);
        ctx.output(0, 256);
        0
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "test source")
    }
}

#[test]
fn test_stop_sources_drains_and_wait_returns() {
    let mut app = App::new();
    let sid = app.new_stream();

    let src = app
        .add_filter(
            Arc::new(EndlessSource {
                calls: AtomicU32::new(0),
            }),
            "endless",
            &[],
        )
        .unwrap();
    let sink_module = Arc::new(NibblingSink::default());
    let sink = app.add_filter(sink_module.clone(), "sink", &[]).unwrap();
    app.connect(sid, src, sink).unwrap();

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, 2).unwrap();

    // Let it flow briefly, then cut the sources from another thread
    // the way a controller or signal handler would.
    let stopper = app.stop_handle(sid).unwrap();
    let cutter = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        stopper.stop();
    });

    app.stream_wait(sid).unwrap();
    cutter.join().unwrap();
    app.stream_stop(sid).unwrap();

    // It ran, and it stopped.
    assert!(!sink_module.bytes.lock().is_empty());
}
