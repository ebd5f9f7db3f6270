//! Streams: connection lists and flow-cycle state
//!
//! A stream is a set of directed edges between filters of one app. The
//! edge list is the only thing a user edits; everything runnable (port
//! numbers, buffers, jobs, the worker pool) is derived from it by
//! readiness and torn down at stop.

use std::sync::Arc;

use bitflags::bitflags;

use super::filter::FilterId;
use super::scheduler::{FlowCore, Runtime};

/// Port number sentinel: resolved to the next unused port by readiness.
pub const NEXT_PORT: u32 = u32::MAX;

/// Handle to a stream within its app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct StreamFlags: u32 {
        /// Permit cycles in the filter graph.
        const ALLOW_LOOPS = 1;
        /// Filter `start()` callbacks are running.
        const STARTING = 1 << 1;
        /// Filter `stop()` callbacks are running.
        const STOPPING = 1 << 2;
        /// The stream has been launched and not yet stopped.
        const LAUNCHED = 1 << 3;
    }
}

/// One directed edge. Ports may be [`NEXT_PORT`] until readiness
/// resolves them.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Connection {
    pub from: FilterId,
    pub from_port: u32,
    pub to: FilterId,
    pub to_port: u32,
}

pub(crate) struct Stream {
    pub connections: Vec<Connection>,
    pub flags: StreamFlags,
    /// Built by ready, consumed by launch.
    pub runtime: Option<Runtime>,
    /// Live flow state between launch and stop.
    pub flow: Option<Arc<FlowCore>>,
}

impl Stream {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            flags: StreamFlags::empty(),
            runtime: None,
            flow: None,
        }
    }

    /// A stream is "ready" from the moment readiness succeeds until
    /// stop tears the run state down.
    pub fn is_ready(&self) -> bool {
        self.runtime.is_some() || self.flow.is_some()
    }
}
