//! Controllers around the flow: lifecycle hook ordering, post-input
//! callbacks observing byte counts, and the built-in bytes_rate
//! controller publishing totals.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use quickstream::controllers::BytesRateController;
use quickstream::filters::{CountFilter, SinkFilter};
use quickstream::{
    App, ControllerModule, FilterHookInfo, GetFlags, HookContext, ParamType, Value,
};

/// Records every hook invocation as "phase:filter".
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl ControllerModule for Recorder {
    fn pre_start(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        self.log.lock().push(format!("preStart:{}", f.name));
        0
    }
    fn post_start(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        self.log.lock().push(format!("postStart:{}", f.name));
        0
    }
    fn pre_stop(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        self.log.lock().push(format!("preStop:{}", f.name));
        0
    }
    fn post_stop(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        self.log.lock().push(format!("postStop:{}", f.name));
        0
    }
    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "test recorder")
    }
}

/// Registers a post-input callback on every filter and tallies the
/// reported byte counts.
struct Tally {
    bytes_out: Arc<Mutex<u64>>,
}

impl ControllerModule for Tally {
    fn pre_start(&self, ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        let bytes = self.bytes_out.clone();
        ctx.add_post_filter_input(
            f.id,
            Box::new(move |report| {
                *bytes.lock() += report.lens_out.iter().map(|&n| n as u64).sum::<u64>();
                0
            }),
        )
        .unwrap();
        0
    }
    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "test tally")
    }
}

fn build_chain(app: &mut App) -> quickstream::StreamId {
    let sid = app.new_stream();
    let src = app
        .add_filter(Arc::new(CountFilter::new(0, 200)), "count", &[])
        .unwrap();
    let sink = app
        .add_filter(Arc::new(SinkFilter::new()), "sink", &[])
        .unwrap();
    app.connect(sid, src, sink).unwrap();
    sid
}

#[test]
fn test_hook_ordering_around_flow_cycle() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new();
    app.add_controller(Arc::new(Recorder { log: log.clone() }), "recorder", &[])
        .unwrap();
    let sid = build_chain(&mut app);

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, 2).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    let log = log.lock().clone();
    assert_eq!(
        log,
        vec![
            "preStart:count",
            "preStart:sink",
            "postStart:count",
            "postStart:sink",
            "preStop:count",
            "preStop:sink",
            "postStop:count",
            "postStop:sink",
        ]
    );
}

#[test]
fn test_post_input_callbacks_see_byte_counts() {
    let bytes_out: Arc<Mutex<u64>> = Arc::new(Mutex::new(0));
    let mut app = App::new();
    app.add_controller(
        Arc::new(Tally {
            bytes_out: bytes_out.clone(),
        }),
        "tally",
        &[],
    )
    .unwrap();
    let sid = build_chain(&mut app);

    app.stream_ready(sid).unwrap();
    app.stream_launch(sid, 2).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    // Only the source produces: 200 u64 values.
    assert_eq!(*bytes_out.lock(), 1600);
}

#[test]
fn test_bytes_rate_controller_publishes_totals() {
    let mut app = App::new();
    app.add_controller(Arc::new(BytesRateController::default()), "bytes_rate", &[])
        .unwrap();
    let sid = build_chain(&mut app);

    app.stream_ready(sid).unwrap();

    // Observe the controller-owned parameter for the source filter.
    let last: Arc<Mutex<u64>> = Arc::new(Mutex::new(0));
    let l2 = last.clone();
    let n = app
        .parameter_get_controller(
            "bytes_rate",
            "count-bytes-out",
            Some(ParamType::Uint64),
            Arc::new(move |v: &Value, _: &str| *l2.lock() = v.as_uint64().unwrap()),
            GetFlags::empty(),
        )
        .unwrap();
    assert_eq!(n, 1);

    app.stream_launch(sid, 2).unwrap();
    app.stream_wait(sid).unwrap();
    app.stream_stop(sid).unwrap();

    assert_eq!(*last.lock(), 1600);
}
