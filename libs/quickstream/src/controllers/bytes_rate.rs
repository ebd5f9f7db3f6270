//! Byte-throughput controller
//!
//! Registers a post-input callback on every filter of the stream,
//! tallies bytes produced per filter, publishes the running totals as
//! controller-owned `Uint64` parameters (one per filter, named
//! `<filter>-bytes-out`), and logs the per-filter rate at stop.
//!
//! The clock is pluggable: the precise monotonic clock, or the coarse
//! kernel clock for callers who prefer cheaper reads over resolution.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use crate::core::app::{ControllerConstructContext, HookContext};
use crate::core::controller::{ControllerModule, FilterHookInfo, PostInputReport};
use crate::core::error::Error;
use crate::core::parameter::{ParamType, Value};

use crate::filters::arg_value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateClock {
    /// `std::time::Instant`; precise.
    Monotonic,
    /// `CLOCK_MONOTONIC_COARSE`; cheaper reads, tick-granular.
    Coarse,
}

impl RateClock {
    fn now_ms(self, epoch: Instant) -> u64 {
        match self {
            RateClock::Monotonic => epoch.elapsed().as_millis() as u64,
            #[cfg(target_os = "linux")]
            RateClock::Coarse => {
                let mut ts = libc::timespec {
                    tv_sec: 0,
                    tv_nsec: 0,
                };
                // SAFETY: clock_gettime only writes the passed struct.
                unsafe {
                    libc::clock_gettime(libc::CLOCK_MONOTONIC_COARSE, &mut ts);
                }
                ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
            }
            #[cfg(not(target_os = "linux"))]
            RateClock::Coarse => epoch.elapsed().as_millis() as u64,
        }
    }
}

pub struct BytesRateController {
    clock: Mutex<RateClock>,
    epoch: Instant,
    /// Filter name → (bytes out so far, start timestamp ms).
    totals: Arc<Mutex<HashMap<String, (u64, u64)>>>,
}

impl Default for BytesRateController {
    fn default() -> Self {
        Self {
            clock: Mutex::new(RateClock::Monotonic),
            epoch: Instant::now(),
            totals: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl BytesRateController {
    pub fn with_clock(clock: RateClock) -> Self {
        let c = Self::default();
        *c.clock.lock() = clock;
        c
    }

    fn now_ms(&self) -> u64 {
        self.clock.lock().now_ms(self.epoch)
    }
}

impl ControllerModule for BytesRateController {
    fn construct(&self, ctx: &mut ControllerConstructContext<'_>) -> i32 {
        if let Some(v) = arg_value(ctx.args(), "--clock") {
            match v {
                "coarse" => *self.clock.lock() = RateClock::Coarse,
                "monotonic" => *self.clock.lock() = RateClock::Monotonic,
                _ => return -1,
            }
        }
        0
    }

    fn pre_start(&self, ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        let pname = format!("{}-bytes-out", f.name);

        // The parameter survives stop/ready cycles; recreating it on a
        // later cycle is expected to collide.
        match ctx.parameter_create(&pname, ParamType::Uint64, None, None) {
            Ok(()) | Err(Error::AlreadyExists(_)) => {}
            Err(_) => return -1,
        }

        self.totals
            .lock()
            .insert(f.name.to_string(), (0, self.now_ms()));

        let totals = self.totals.clone();
        let params = ctx.controller_params.clone();
        let fname = f.name.to_string();
        let hook = move |report: &PostInputReport<'_>| -> i32 {
            let produced: u64 = report.lens_out.iter().map(|&n| n as u64).sum();
            if produced == 0 {
                return 0;
            }
            let total = {
                let mut totals = totals.lock();
                let slot = totals.entry(report.filter_name.to_string()).or_default();
                slot.0 += produced;
                slot.0
            };
            // Observers registered on the parameter see every update.
            let _ = params.push(&format!("{fname}-bytes-out"), Value::Uint64(total));
            0
        };
        if ctx.add_post_filter_input(f.id, Box::new(hook)).is_err() {
            return -1;
        }
        0
    }

    fn pre_stop(&self, _ctx: &mut HookContext<'_>, f: &FilterHookInfo<'_>) -> i32 {
        let now = self.now_ms();
        if let Some(&(bytes, started)) = self.totals.lock().get(f.name) {
            let elapsed = now.saturating_sub(started).max(1);
            info!(
                "filter \"{}\": {} bytes out in {} ms ({} bytes/s)",
                f.name,
                bytes,
                elapsed,
                bytes * 1000 / elapsed
            );
        }
        0
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "bytes_rate: tallies bytes produced per filter and publishes \
             <filter>-bytes-out parameters\n\
             \n\
             options:\n\
             \x20 --clock monotonic|coarse   timestamp source (default monotonic)"
        )
    }
}
