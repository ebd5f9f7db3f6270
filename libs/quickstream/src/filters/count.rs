//! Counting source: emits a configurable run of little-endian `u64`
//! values and then finishes.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::app::ConstructContext;
use crate::core::context::InputContext;
use crate::core::filter::FilterModule;
use crate::core::ports::DEFAULT_MAX_WRITE;

use super::arg_value;

pub struct CountFilter {
    start: AtomicU64,
    count: AtomicU64,
    next: AtomicU64,
}

impl Default for CountFilter {
    fn default() -> Self {
        Self {
            start: AtomicU64::new(0),
            count: AtomicU64::new(1000),
            next: AtomicU64::new(0),
        }
    }
}

impl CountFilter {
    pub fn new(start: u64, count: u64) -> Self {
        Self {
            start: AtomicU64::new(start),
            count: AtomicU64::new(count),
            next: AtomicU64::new(start),
        }
    }
}

impl FilterModule for CountFilter {
    fn construct(&self, ctx: &mut ConstructContext<'_>) -> i32 {
        if let Some(v) = arg_value(ctx.args(), "--start") {
            match v.parse() {
                Ok(n) => {
                    self.start.store(n, Ordering::Relaxed);
                    self.next.store(n, Ordering::Relaxed);
                }
                Err(_) => return -1,
            }
        }
        if let Some(v) = arg_value(ctx.args(), "--count") {
            match v.parse() {
                Ok(n) => self.count.store(n, Ordering::Relaxed),
                Err(_) => return -1,
            }
        }
        0
    }

    fn start(&self, _ctx: &mut crate::core::context::StartContext) -> i32 {
        // A fresh flow cycle restarts the sequence.
        self.next.store(self.start.load(Ordering::Relaxed), Ordering::Relaxed);
        0
    }

    fn input(&self, ctx: &mut InputContext<'_>) -> i32 {
        let start = self.start.load(Ordering::Relaxed);
        let count = self.count.load(Ordering::Relaxed);
        let next = self.next.load(Ordering::Relaxed);
        let end = start + count;
        if next >= end {
            return 1;
        }

        let per_call = (DEFAULT_MAX_WRITE / 8) as u64;
        let n = (end - next).min(per_call);
        let len = (n * 8) as usize;

        // Every output port carries the same sequence.
        for port in 0..ctx.num_outputs() {
            let buf = ctx.output_buffer(port, len);
            for (i, chunk) in buf.chunks_exact_mut(8).enumerate() {
                chunk.copy_from_slice(&(next + i as u64).to_le_bytes());
            }
            ctx.output(port, len);
        }
        self.next.store(next + n, Ordering::Relaxed);

        if next + n >= end {
            1
        } else {
            0
        }
    }

    fn help(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "count: source emitting uint64 values [start, start+count) as little-endian bytes\n\
             \n\
             options:\n\
             \x20 --start N   first value (default 0)\n\
             \x20 --count N   how many values to emit (default 1000)"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let f = CountFilter::default();
        assert_eq!(f.start.load(Ordering::Relaxed), 0);
        assert_eq!(f.count.load(Ordering::Relaxed), 1000);
    }
}
