//! The filter module contract and the app-side filter record
//!
//! A filter is the unit of processing in the graph: it consumes bytes
//! on its input ports, produces bytes on its output ports, and is
//! driven entirely by the scheduler. Only `input` is required; the
//! lifecycle callbacks are optional and default to no-ops, mirroring
//! the plugin symbol set the loader resolves.
//!
//! `input` may run on several worker threads at once, up to
//! [`FilterModule::max_threads`], so the trait is `Send + Sync` and
//! modules keep their mutable state behind atomics or a lock.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use super::app::ConstructContext;
use super::context::{InputContext, StartContext};
use super::controller::PostInputHook;
use super::parameter::OwnerCell;

/// Handle to a loaded filter, stable for the filter's lifetime within
/// its app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(pub(crate) usize);

/// The callbacks a filter plugin exposes.
///
/// Return conventions follow the wire contract: `0` = continue,
/// positive = finished gracefully, negative = error (logged, filter
/// retired).
pub trait FilterModule: Send + Sync {
    /// Called once at load with the module arguments. May load further
    /// filters and add connections through the context.
    fn construct(&self, _ctx: &mut ConstructContext<'_>) -> i32 {
        0
    }

    /// Called once per flow cycle after port counts are final, before
    /// buffers are mapped. Thresholds, read promises, and buffer
    /// declarations happen here.
    fn start(&self, _ctx: &mut StartContext) -> i32 {
        0
    }

    /// The work function. Called by worker threads whenever input is
    /// available (or unconditionally for sources) and no output is
    /// clogged.
    fn input(&self, ctx: &mut InputContext<'_>) -> i32;

    /// Called once per flow cycle at stream stop.
    fn stop(&self, _n_in: u32, _n_out: u32) -> i32 {
        0
    }

    /// Called at unload or app teardown.
    fn destroy(&self) {}

    /// Render usage text for `--filter-help`.
    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "(no help)")
    }

    /// Most worker threads this filter tolerates inside `input` at
    /// once.
    fn max_threads(&self) -> u32 {
        1
    }
}

/// Lifecycle phase marker, used to reject API calls from the wrong
/// phase and to track retirement during flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterState {
    Idle,
    InConstruct,
    InStart,
    InStop,
    Finished,
}

/// App-side record for one loaded filter.
pub(crate) struct FilterEntry {
    pub name: String,
    pub module: Arc<dyn FilterModule>,
    /// Stream this filter currently belongs to, if any.
    pub stream: Option<usize>,
    pub max_threads: u32,
    /// Port counts; valid after a successful ready.
    pub n_in: u32,
    pub n_out: u32,
    pub state: FilterState,
    pub params: Arc<OwnerCell>,
    /// Post-input hooks keyed by the registering controller's name.
    pub post_input: BTreeMap<String, Arc<PostInputHook>>,
    /// Keeps the backing dynamic library alive for dylib-loaded
    /// modules.
    pub lib: Option<Arc<libloading::Library>>,
}
