//! Copying transform: forwards input port 0 to every output port
//! through a real copy. The boring baseline next to `passthrough`.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::app::ConstructContext;
use crate::core::context::{InputContext, StartContext};
use crate::core::filter::FilterModule;
use crate::core::ports::DEFAULT_MAX_WRITE;

use super::arg_value;

pub struct CopyFilter {
    max_write: AtomicUsize,
}

impl Default for CopyFilter {
    fn default() -> Self {
        Self {
            max_write: AtomicUsize::new(DEFAULT_MAX_WRITE),
        }
    }
}

impl FilterModule for CopyFilter {
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
        // Every output port carries the full per-call copy, so each
        // buffer's max-write must match the configured length.
        let max_write = self.max_write.load(Ordering::Relaxed);
        for port in 0..ctx.num_outputs() {
            if ctx.create_output_buffer(port, max_write).is_err() {
                return -1;
            }
        }
        0
    }

    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        let len = ctx
            .input_len(0)
            .min(self.max_write.load(Ordering::Relaxed));
        if len == 0 {
            return 0;
        }
        // copy_to_output commits the bytes against each port's
        // max-write window; only the input advance remains.
        for port in 0..ctx.num_outputs() {
            ctx.copy_to_output(0, port, len);
        }
        ctx.advance_input(0, len);
        0
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "copy: copies input port 0 to every output port\n\
             \n\
             options:\n\
             \x20 --max-write N   bytes copied per input() call (default {DEFAULT_MAX_WRITE})"
        )
    }
}
