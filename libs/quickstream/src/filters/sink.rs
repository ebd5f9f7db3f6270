//! Collecting sink: consumes every input port, optionally keeping the
//! bytes for inspection and optionally sleeping per call (handy as the
//! deliberately slow consumer in back-pressure setups).

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::app::ConstructContext;
use crate::core::context::InputContext;
use crate::core::filter::FilterModule;

use super::arg_value;

#[derive(Default)]
pub struct SinkFilter {
    sleep_ms: AtomicU64,
    collected: Mutex<Vec<u8>>,
}

impl SinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sleep(ms: u64) -> Self {
        Self {
            sleep_ms: AtomicU64::new(ms),
            collected: Mutex::new(Vec::new()),
        }
    }

    /// Everything consumed so far, across all input ports in arrival
    /// order.
    pub fn collected(&self) -> Vec<u8> {
        self.collected.lock().clone()
    }

    /// Collected bytes reinterpreted as little-endian `u64`s.
    pub fn collected_u64s(&self) -> Vec<u64> {
        self.collected
            .lock()
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().expect("chunks of 8")))
            .collect()
    }
}

impl FilterModule for SinkFilter {
    fn construct(&self, ctx: &mut ConstructContext<'_>) -> i32 {
        if let Some(v) = arg_value(ctx.args(), "--sleep-ms") {
            match v.parse() {
                Ok(n) => self.sleep_ms.store(n, Ordering::Relaxed),
                Err(_) => return -1,
            }
        }
        0
    }

    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        let sleep = self.sleep_ms.load(Ordering::Relaxed);
        if sleep > 0 {
            std::thread::sleep(Duration::from_millis(sleep));
        }
        for port in 0..ctx.num_inputs() {
            let len = ctx.input_len(port);
            if len == 0 {
                continue;
            }
            self.collected.lock().extend_from_slice(ctx.input(port));
            ctx.advance_input(port, len);
        }
        0
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "sink: consumes every input port, keeping the bytes for inspection\n\
             \n\
             options:\n\
             \x20 --sleep-ms N   sleep this long in every input() call (default 0)"
        )
    }
}
