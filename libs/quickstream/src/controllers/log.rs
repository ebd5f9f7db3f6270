//! Lifecycle logger: traces every hook it receives. Useful for seeing
//! what the runtime does to a stream without instrumenting filters.

use std::io;

use tracing::info;

use crate::core::app::{ControllerConstructContext, HookContext};
use crate::core::controller::{ControllerModule, FilterHookInfo};

pub struct LogController;

impl ControllerModule for LogController {
    fn construct(&self, ctx: &mut ControllerConstructContext<'_>) -> i32 {
        info!("log controller loaded with args {:?}", ctx.args());
        0
    }

    fn pre_start(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        info!(
            "preStart: filter \"{}\" ({} in, {} out)",
            f.name, f.n_in, f.n_out
        );
        0
    }

    fn post_start(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        info!("postStart: filter \"{}\"", f.name);
        0
    }

    fn pre_stop(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        info!("preStop: filter \"{}\"", f.name);
        0
    }

    fn post_stop(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        info!("postStop: filter \"{}\"", f.name);
        0
    }

    fn destroy(&self) {
        info!("log controller unloaded");
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "log: traces stream lifecycle hooks")
    }
}
