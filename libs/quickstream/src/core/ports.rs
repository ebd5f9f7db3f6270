//! Output and reader port records
//!
//! An [`Output`] is the producer side of one out-port: it owns (or, for
//! pass-through chains, shares) a ring buffer and carries the write
//! cursor. A [`Reader`] is one consumer attached to an output: read
//! cursor, accumulated readable length, and the two knobs a consumer may
//! set in `start()`: the minimum-read threshold and the read promise.
//!
//! All cursor fields are byte offsets into the ring's circular range
//! `[0, map_len)` and only move during scheduler reconcile, under the
//! stream mutex.

use std::sync::Arc;

use super::ring::RingBuffer;

/// Default maximum bytes a producer writes per `input()` call.
pub const DEFAULT_MAX_WRITE: usize = 1024;

/// Default minimum readable bytes before a consumer is called.
pub const DEFAULT_THRESHOLD: usize = 1;

/// Default read promise: the most a consumer may hold un-advanced
/// before it must consume.
pub const DEFAULT_READ_PROMISE: usize = 1024;

/// Producer side of one output port.
pub(crate) struct Output {
    /// Mapped ring; `None` until the readiness mapping stage.
    pub ring: Option<Arc<RingBuffer>>,
    /// Write cursor, offset into `[0, map_len)`.
    pub write_off: usize,
    /// Most this port writes per `input()` call.
    pub max_write: usize,
    /// Clog threshold: a reader whose readable length reaches this
    /// blocks the producer. Computed at the mapping stage.
    pub usable_len: usize,
    /// Buffer was created explicitly in `start()`.
    pub explicit: bool,
    /// Input port of the same filter this output shares its buffer
    /// with, when declared pass-through.
    pub pass_through_from: Option<u32>,
    pub readers: Vec<Reader>,
}

impl Output {
    pub fn new() -> Self {
        Self {
            ring: None,
            write_off: 0,
            max_write: DEFAULT_MAX_WRITE,
            usable_len: 0,
            explicit: false,
            pass_through_from: None,
            readers: Vec::new(),
        }
    }
}

/// Consumer handle on an [`Output`].
pub(crate) struct Reader {
    /// Run-index of the consuming filter.
    pub consumer: usize,
    /// Input port number the consumer sees.
    pub input_port: u32,
    /// Read cursor, offset into `[0, map_len)`.
    pub read_off: usize,
    /// Bytes published but not yet advanced past.
    pub readable: usize,
    /// Minimum readable bytes before the consumer is called.
    pub threshold: usize,
    /// Most the consumer may hold un-advanced when offered.
    pub promise: usize,
}

impl Reader {
    pub fn new(consumer: usize, input_port: u32) -> Self {
        Self {
            consumer,
            input_port,
            read_off: 0,
            readable: 0,
            threshold: DEFAULT_THRESHOLD,
            promise: DEFAULT_READ_PROMISE,
        }
    }
}

/// Consumer-side address of the [`Reader`] feeding one input port:
/// `(feeder run-index, output port, reader index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReaderRef {
    pub feeder: usize,
    pub out_port: u32,
    pub reader_idx: usize,
}
