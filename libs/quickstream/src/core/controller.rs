//! The controller module contract
//!
//! Controllers sit outside the flow graph and interpose on its
//! lifecycle: filters provide the knobs, controllers turn and observe
//! them. A controller gets a hook around each side of every filter's
//! start/stop, may register per-filter post-input callbacks that see
//! the byte counts of every `input` call, and may own parameters of its
//! own.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::parameter::OwnerCell;

/// Handle to a loaded controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ControllerId(pub(crate) usize);

/// Per-filter facts passed to lifecycle hooks.
pub struct FilterHookInfo<'a> {
    pub name: &'a str,
    pub id: super::filter::FilterId,
    pub n_in: u32,
    pub n_out: u32,
}

/// What a post-input callback sees after each `input` call returns.
pub struct PostInputReport<'a> {
    pub filter_name: &'a str,
    /// Bytes consumed per input port on this call.
    pub lens_in: &'a [usize],
    /// Bytes produced per output port on this call.
    pub lens_out: &'a [usize],
    /// Per input port: the feeder was flushing on this call.
    pub flushing: &'a [bool],
    pub n_in: u32,
    pub n_out: u32,
}

/// Post-input callback: non-zero return marks the callback for removal
/// at the next stream stop.
pub type PostInputFn = dyn Fn(&PostInputReport<'_>) -> i32 + Send + Sync;

pub(crate) struct PostInputHook {
    pub cb: Box<PostInputFn>,
    /// Set when the callback asked to be removed; honored at stop.
    pub retire: AtomicBool,
}

/// The callbacks a controller plugin exposes. All optional.
pub trait ControllerModule: Send + Sync {
    /// Called once at load with the module arguments.
    fn construct(&self, _ctx: &mut super::app::ControllerConstructContext<'_>) -> i32 {
        0
    }

    /// Called for every filter of a stream becoming ready, before any
    /// filter `start` runs. Controllers are called in load order.
    fn pre_start(
        &self,
        _ctx: &mut super::app::HookContext<'_>,
        _filter: &FilterHookInfo<'_>,
    ) -> i32 {
        0
    }

    /// Called for every filter after all filter `start`s succeeded and
    /// buffers are mapped.
    fn post_start(
        &self,
        _ctx: &mut super::app::HookContext<'_>,
        _filter: &FilterHookInfo<'_>,
    ) -> i32 {
        0
    }

    /// Called for every filter at stream stop before filter `stop`s.
    /// Controllers are called in reverse load order.
    fn pre_stop(
        &self,
        _ctx: &mut super::app::HookContext<'_>,
        _filter: &FilterHookInfo<'_>,
    ) -> i32 {
        0
    }

    /// Called for every filter after filter `stop`s ran.
    fn post_stop(
        &self,
        _ctx: &mut super::app::HookContext<'_>,
        _filter: &FilterHookInfo<'_>,
    ) -> i32 {
        0
    }

    /// Called at unload or app teardown.
    fn destroy(&self) {}

    /// Render usage text.
    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "(no help)")
    }
}

/// App-side record for one loaded controller.
pub(crate) struct ControllerEntry {
    pub name: String,
    pub module: Arc<dyn ControllerModule>,
    pub params: Arc<OwnerCell>,
    /// Keeps the backing dynamic library alive for dylib-loaded
    /// modules.
    pub lib: Option<Arc<libloading::Library>>,
}
