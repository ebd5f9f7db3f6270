//! Zero-copy pass-through: input port 0 shares its ring buffer with
//! output port 0, so bytes move downstream without being touched.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::app::ConstructContext;
use crate::core::context::{InputContext, StartContext};
use crate::core::filter::FilterModule;
use crate::core::ports::DEFAULT_MAX_WRITE;

use super::arg_value;

pub struct PassThroughFilter {
    max_write: AtomicUsize,
}

impl Default for PassThroughFilter {
    fn default() -> Self {
        Self {
            max_write: AtomicUsize::new(DEFAULT_MAX_WRITE),
        }
    }
}

impl FilterModule for PassThroughFilter {
    fn construct(&self, ctx: &mut ConstructContext<'_>) -> i32 {
        if let Some(v) = arg_value(ctx.args(), "--max-write") {
            match v.parse() {
                Ok(n) => self.max_write.store(n, Ordering::Relaxed),
                Err(_) => return -1,
            }
        }
        0
    }

    fn start(&self, ctx: &mut StartContext) -> i32 {
        if ctx.num_inputs() != 1 || ctx.num_outputs() != 1 {
            return -1;
        }
        match ctx.create_pass_through_buffer(0, 0, self.max_write.load(Ordering::Relaxed)) {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }

    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        // The pass-through contract: advance and output the same
        // length.
        let len = ctx
            .input_len(0)
            .min(self.max_write.load(Ordering::Relaxed));
        if len > 0 {
            ctx.output(0, len);
            ctx.advance_input(0, len);
        }
        0
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "passthrough: forwards input port 0 to output port 0 over one shared ring \
             buffer (zero-copy)\n\
             \n\
             options:\n\
             \x20 --max-write N   bytes forwarded per input() call (default {DEFAULT_MAX_WRITE})"
        )
    }
}
