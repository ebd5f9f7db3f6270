//! quickstream: a runtime for directed filter graphs
//!
//! Pluggable data-processing filters are connected by numbered ports
//! into a stream; bulk bytes move through lock-less mapped ring buffers
//! while a pool of worker threads flows through the graph calling each
//! filter's `input()` wherever work is available. Out-of-band
//! controllers observe and mutate small named parameters without
//! touching the byte path.
//!
//! The typical embedding:
//!
//! ```no_run
//! use quickstream::{App, Value};
//!
//! let mut app = App::new();
//! let sid = app.new_stream();
//! let src = app.load_filter("count", &["--count".into(), "1000".into()]).unwrap();
//! let sink = app.load_filter("sink", &[]).unwrap();
//! app.connect(sid, src, sink).unwrap();
//!
//! app.stream_ready(sid).unwrap();
//! app.stream_launch(sid, 4).unwrap();
//! app.stream_wait(sid).unwrap();
//! app.stream_stop(sid).unwrap();
//! ```

pub mod core;
pub mod controllers;
pub mod filters;

pub use core::{
    app_dot, clear_error, last_error, push, App, ConstructContext, ControllerConstructContext,
    ControllerId, ControllerModule, DotDetail, Error, FilterHookInfo, FilterId, FilterModule,
    ForEachItem, GetFlags, GetFn, HookContext, InputContext, OwnerKind, ParamType,
    PluginDeclaration, PostInputFn, PostInputReport, Result, SetFn, SourceStopper, StartContext,
    StreamId, Value, DEFAULT_MAX_WRITE, DEFAULT_READ_PROMISE, DEFAULT_THRESHOLD,
    MAX_NAME_SUFFIX, NEXT_PORT, QUICKSTREAM_ABI_VERSION,
};
pub use core::{list_controllers, list_filters, register_controller, register_filter};
