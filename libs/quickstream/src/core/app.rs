//! The app: top-level container for filters, controllers, and streams
//!
//! One app owns everything. Filters and controllers are loaded into it
//! (from the built-in registry or dynamic libraries), streams connect
//! filters into a graph, and teardown destroys children in reverse load
//! order.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::context;
use super::controller::{
    ControllerEntry, ControllerId, ControllerModule, PostInputFn, PostInputHook,
};
use super::error::{Error, Result};
use super::filter::{FilterEntry, FilterId, FilterModule, FilterState};
use super::parameter::{GetFlags, GetFn, OwnerCell, OwnerKind, ParamType, SetFn, Value};
use super::plugin;
use super::ready;
use super::scheduler::{FlowCore, SourceStopper};
use super::stream::{Stream, StreamFlags, StreamId, Connection, NEXT_PORT};

/// Soft bound on `-2`, `-3`, … auto-name suffixes. Documented, not
/// load-bearing.
pub const MAX_NAME_SUFFIX: u32 = 10_000;

pub struct App {
    /// Slot per load; slots are never reused, so index order is load
    /// order.
    pub(crate) filters: Vec<Option<FilterEntry>>,
    pub(crate) controllers: Vec<Option<ControllerEntry>>,
    pub(crate) streams: Vec<Stream>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            controllers: Vec::new(),
            streams: Vec::new(),
        }
    }

    // ----------------------------------------------------------------
    // Filter and controller loading
    // ----------------------------------------------------------------

    /// Load a filter module by name or path and run its `construct`.
    /// The filter's name derives from the spec's file stem; collisions
    /// get `-2`, `-3`, … suffixes.
    pub fn load_filter(&mut self, spec: &str, args: &[String]) -> Result<FilterId> {
        self.load_filter_named(spec, None, args)
    }

    /// Like [`Self::load_filter`] with an explicit name; an explicit
    /// name that is taken is a [`Error::NameClash`].
    pub fn load_filter_named(
        &mut self,
        spec: &str,
        name: Option<&str>,
        args: &[String],
    ) -> Result<FilterId> {
        let (module, lib) = plugin::load_filter_module(spec)?;
        let base = plugin::derive_name(spec);
        self.install_filter(module, lib, name, &base, args)
    }

    /// Install a module instance directly, bypassing the loader. This
    /// is how embedding code and tests provide custom filters.
    pub fn add_filter(
        &mut self,
        module: Arc<dyn FilterModule>,
        name: &str,
        args: &[String],
    ) -> Result<FilterId> {
        self.install_filter(module, None, Some(name), name, args)
    }

    fn install_filter(
        &mut self,
        module: Arc<dyn FilterModule>,
        lib: Option<Arc<libloading::Library>>,
        explicit: Option<&str>,
        base: &str,
        args: &[String],
    ) -> Result<FilterId> {
        let name = self.resolve_name(explicit, base, true)?;
        let params = OwnerCell::new(OwnerKind::Filter, name.clone());
        let max_threads = module.max_threads().max(1);

        let id = FilterId(self.filters.len());
        self.filters.push(Some(FilterEntry {
            name: name.clone(),
            module: module.clone(),
            stream: None,
            max_threads,
            n_in: 0,
            n_out: 0,
            state: FilterState::InConstruct,
            params: params.clone(),
            post_input: BTreeMap::new(),
            lib,
        }));

        let ret = {
            let mut ctx = ConstructContext {
                app: self,
                owner: params.clone(),
                args: args.to_vec(),
                self_id: id,
            };
            context::with_owner(params, || module.construct(&mut ctx))
        };
        if ret != 0 {
            self.filters[id.0] = None;
            return Err(
                Error::Load(format!("filter \"{name}\" construct() returned {ret}")).record(),
            );
        }
        self.entry_mut(id).state = FilterState::Idle;
        debug!("loaded filter \"{name}\"");
        Ok(id)
    }

    /// Load a controller module by name or path and run its
    /// `construct`.
    pub fn load_controller(&mut self, spec: &str, args: &[String]) -> Result<ControllerId> {
        self.load_controller_named(spec, None, args)
    }

    pub fn load_controller_named(
        &mut self,
        spec: &str,
        name: Option<&str>,
        args: &[String],
    ) -> Result<ControllerId> {
        let (module, lib) = plugin::load_controller_module(spec)?;
        let base = plugin::derive_name(spec);
        self.install_controller(module, lib, name, &base, args)
    }

    /// Install a controller instance directly.
    pub fn add_controller(
        &mut self,
        module: Arc<dyn ControllerModule>,
        name: &str,
        args: &[String],
    ) -> Result<ControllerId> {
        self.install_controller(module, None, Some(name), name, args)
    }

    fn install_controller(
        &mut self,
        module: Arc<dyn ControllerModule>,
        lib: Option<Arc<libloading::Library>>,
        explicit: Option<&str>,
        base: &str,
        args: &[String],
    ) -> Result<ControllerId> {
        let name = self.resolve_name(explicit, base, false)?;
        let params = OwnerCell::new(OwnerKind::Controller, name.clone());

        let id = ControllerId(self.controllers.len());
        self.controllers.push(Some(ControllerEntry {
            name: name.clone(),
            module: module.clone(),
            params: params.clone(),
            lib,
        }));

        let ret = {
            let mut ctx = ControllerConstructContext {
                app: self,
                owner: params.clone(),
                args: args.to_vec(),
            };
            context::with_owner(params, || module.construct(&mut ctx))
        };
        if ret != 0 {
            self.controllers[id.0] = None;
            return Err(Error::Load(format!(
                "controller \"{name}\" construct() returned {ret}"
            ))
            .record());
        }
        debug!("loaded controller \"{name}\"");
        Ok(id)
    }

    /// Load a module just to print its help text, without installing
    /// it.
    pub fn filter_help(spec: &str, out: &mut dyn io::Write) -> Result<()> {
        let (module, _lib) = plugin::load_filter_module(spec)?;
        module.help(out)?;
        Ok(())
    }

    fn resolve_name(&self, explicit: Option<&str>, base: &str, is_filter: bool) -> Result<String> {
        let taken = |n: &str| {
            if is_filter {
                self.filters
                    .iter()
                    .flatten()
                    .any(|f| f.name == n)
            } else {
                self.controllers
                    .iter()
                    .flatten()
                    .any(|c| c.name == n)
            }
        };
        if let Some(name) = explicit {
            if taken(name) {
                return Err(Error::NameClash(name.to_string()).record());
            }
            return Ok(name.to_string());
        }
        if !taken(base) {
            return Ok(base.to_string());
        }
        for i in 2..=MAX_NAME_SUFFIX {
            let candidate = format!("{base}-{i}");
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::NameClash(base.to_string()).record())
    }

    /// Unload a filter: runs `destroy`, destroys its parameters, and
    /// removes its connections. The filter's stream must not be ready.
    pub fn unload_filter(&mut self, id: FilterId) -> Result<()> {
        let entry = self
            .filters
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::LifecycleMisuse("no such filter".into()).record())?;
        if let Some(si) = entry.stream {
            if self.streams[si].is_ready() {
                return Err(Error::LifecycleMisuse(format!(
                    "cannot unload filter \"{}\" while its stream is set up",
                    entry.name
                ))
                .record());
            }
            self.streams[si]
                .connections
                .retain(|c| c.from != id && c.to != id);
        }
        let entry = self.filters[id.0].take().expect("checked above");
        entry.module.destroy();
        entry.params.destroy_all();
        debug!("unloaded filter \"{}\"", entry.name);
        Ok(())
    }

    /// Unload a controller: runs `destroy` and destroys its
    /// parameters.
    pub fn unload_controller(&mut self, id: ControllerId) -> Result<()> {
        let entry = self
            .controllers
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| Error::LifecycleMisuse("no such controller".into()).record())?;
        entry.module.destroy();
        entry.params.destroy_all();
        debug!("unloaded controller \"{}\"", entry.name);
        Ok(())
    }

    // ----------------------------------------------------------------
    // Lookup
    // ----------------------------------------------------------------

    /// Loaded filter ids in load order.
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.filters
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|_| FilterId(i)))
            .collect()
    }

    pub fn filter_id(&self, name: &str) -> Option<FilterId> {
        self.filters
            .iter()
            .enumerate()
            .find(|(_, f)| f.as_ref().is_some_and(|f| f.name == name))
            .map(|(i, _)| FilterId(i))
    }

    pub fn filter_name(&self, id: FilterId) -> Option<&str> {
        self.filters
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|f| f.name.as_str())
    }

    pub fn controller_id(&self, name: &str) -> Option<ControllerId> {
        self.controllers
            .iter()
            .enumerate()
            .find(|(_, c)| c.as_ref().is_some_and(|c| c.name == name))
            .map(|(i, _)| ControllerId(i))
    }

    pub(crate) fn entry(&self, id: FilterId) -> &FilterEntry {
        self.filters[id.0].as_ref().expect("live filter entry")
    }

    pub(crate) fn entry_mut(&mut self, id: FilterId) -> &mut FilterEntry {
        self.filters[id.0].as_mut().expect("live filter entry")
    }

    // ----------------------------------------------------------------
    // Streams
    // ----------------------------------------------------------------

    pub fn new_stream(&mut self) -> StreamId {
        self.streams.push(Stream::new());
        StreamId(self.streams.len() - 1)
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        (0..self.streams.len()).map(StreamId).collect()
    }

    /// Permit (or forbid) cycles in the stream's graph.
    pub fn allow_loops(&mut self, sid: StreamId, allow: bool) -> Result<()> {
        let stream = self.stream_mut(sid)?;
        stream.flags.set(StreamFlags::ALLOW_LOOPS, allow);
        Ok(())
    }

    /// Append an edge with explicit port numbers (or [`NEXT_PORT`]).
    pub fn plug(
        &mut self,
        sid: StreamId,
        from: FilterId,
        from_port: u32,
        to: FilterId,
        to_port: u32,
    ) -> Result<()> {
        self.stream(sid)?;
        if self.streams[sid.0].is_ready() {
            return Err(Error::LifecycleMisuse(
                "cannot edit connections while the stream is set up".into(),
            )
            .record());
        }
        for id in [from, to] {
            let entry = self
                .filters
                .get(id.0)
                .and_then(Option::as_ref)
                .ok_or_else(|| Error::LifecycleMisuse("no such filter".into()).record())?;
            match entry.stream {
                None => {}
                Some(s) if s == sid.0 => {}
                Some(s) => {
                    return Err(Error::LifecycleMisuse(format!(
                        "filter \"{}\" already belongs to stream {s}",
                        entry.name
                    ))
                    .record());
                }
            }
        }
        self.entry_mut(from).stream = Some(sid.0);
        self.entry_mut(to).stream = Some(sid.0);
        self.streams[sid.0].connections.push(Connection {
            from,
            from_port,
            to,
            to_port,
        });
        Ok(())
    }

    /// Append an edge with ports chosen by readiness.
    pub fn connect(&mut self, sid: StreamId, from: FilterId, to: FilterId) -> Result<()> {
        self.plug(sid, from, NEXT_PORT, to, NEXT_PORT)
    }

    /// Run the readiness pipeline: validate the topology, assign
    /// ports, run `start`s, size and map buffers.
    pub fn stream_ready(&mut self, sid: StreamId) -> Result<()> {
        self.stream(sid)?;
        ready::ready(self, sid)
    }

    /// Start the flow with up to `max_threads` workers; 0 runs the
    /// whole flow on the calling thread before returning.
    pub fn stream_launch(&mut self, sid: StreamId, max_threads: u32) -> Result<()> {
        self.stream(sid)?;
        if self.streams[sid.0].flags.contains(StreamFlags::LAUNCHED) {
            return Err(Error::LifecycleMisuse("stream has been launched already".into()).record());
        }
        let runtime = self.streams[sid.0].runtime.take().ok_or_else(|| {
            Error::LifecycleMisuse("stream_ready() must succeed before launch".into()).record()
        })?;

        // Snapshot post-input hooks now; controllers had until the end
        // of ready to register them.
        let hooks: Vec<Vec<Arc<PostInputHook>>> = runtime
            .filters
            .iter()
            .map(|rf| {
                self.filters[rf.fid]
                    .as_ref()
                    .map(|e| {
                        e.post_input
                            .values()
                            .filter(|h| !h.retire.load(Ordering::Relaxed))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        let core = FlowCore::launch(runtime, max_threads, hooks);
        let stream = &mut self.streams[sid.0];
        stream.flow = Some(core);
        stream.flags.insert(StreamFlags::LAUNCHED);
        Ok(())
    }

    /// Park until the flow's workers are gone. `Ok(false)` means there
    /// was nothing to wait on.
    pub fn stream_wait(&self, sid: StreamId) -> Result<bool> {
        let stream = self.stream(sid)?;
        match &stream.flow {
            Some(core) => Ok(core.wait()),
            None => Ok(false),
        }
    }

    /// Atomically stop source filters; queued work drains naturally.
    pub fn stop_sources(&self, sid: StreamId) -> Result<()> {
        let stream = self.stream(sid)?;
        match &stream.flow {
            Some(core) => {
                core.stop_sources();
                Ok(())
            }
            None => {
                Err(Error::LifecycleMisuse("stream has not been launched".into()).record())
            }
        }
    }

    /// A clonable handle for ending the flow from another thread or a
    /// signal handler.
    pub fn stop_handle(&self, sid: StreamId) -> Result<SourceStopper> {
        let stream = self.stream(sid)?;
        stream
            .flow
            .as_ref()
            .map(|core| SourceStopper { core: core.clone() })
            .ok_or_else(|| {
                Error::LifecycleMisuse("stream has not been launched".into()).record()
            })
    }

    /// Stop the flow cycle: drain if needed, run the stop-side
    /// controller hooks and filter `stop`s, purge callbacks, and free
    /// every run resource.
    pub fn stream_stop(&mut self, sid: StreamId) -> Result<()> {
        self.stream(sid)?;
        if !self.streams[sid.0].is_ready() {
            warn!("the stream is not set up");
            return Err(Error::LifecycleMisuse("stream is not set up".into()).record());
        }

        if let Some(core) = self.streams[sid.0].flow.clone() {
            core.stop_sources();
            core.wait();
        }

        let participants = self.stream_participants(sid);
        let infos: Vec<(FilterId, String, u32, u32)> = participants
            .iter()
            .map(|&id| {
                let e = self.entry(id);
                (id, e.name.clone(), e.n_in, e.n_out)
            })
            .collect();

        ready::run_controller_hooks(self, sid, &infos, ready::HookPhase::PreStop);

        // Drop post-input callbacks that asked to be removed.
        for &id in &participants {
            self.entry_mut(id)
                .post_input
                .retain(|_, h| !h.retire.load(Ordering::Relaxed));
        }

        for &id in &participants {
            let (module, params, n_in, n_out) = {
                let e = self.entry(id);
                (e.module.clone(), e.params.clone(), e.n_in, e.n_out)
            };
            self.entry_mut(id).state = FilterState::InStop;
            self.streams[sid.0].flags.insert(StreamFlags::STOPPING);
            let ret = context::with_owner(params, || module.stop(n_in, n_out));
            self.streams[sid.0].flags.remove(StreamFlags::STOPPING);
            self.entry_mut(id).state = FilterState::Idle;
            if ret != 0 {
                warn!(
                    "filter \"{}\" stop() returned {ret}",
                    self.entry(id).name
                );
            }
        }

        ready::run_controller_hooks(self, sid, &infos, ready::HookPhase::PostStop);

        // Get-callbacks without keep-at-restart go away in bulk.
        for &id in &participants {
            self.entry(id).params.purge_getters_for_restart();
        }

        let stream = &mut self.streams[sid.0];
        stream.runtime = None;
        stream.flow = None;
        stream.flags.remove(StreamFlags::LAUNCHED);
        for &id in &participants {
            let e = self.entry_mut(id);
            e.n_in = 0;
            e.n_out = 0;
        }
        Ok(())
    }

    /// The stream's edges as `(from, fromPort, to, toPort)` name/port
    /// tuples. Ports are concrete after a successful ready,
    /// [`NEXT_PORT`] before that where the user did not pick one.
    pub fn stream_connections(&self, sid: StreamId) -> Result<Vec<(String, u32, String, u32)>> {
        let stream = self.stream(sid)?;
        Ok(stream
            .connections
            .iter()
            .filter_map(|c| {
                Some((
                    self.filter_name(c.from)?.to_string(),
                    c.from_port,
                    self.filter_name(c.to)?.to_string(),
                    c.to_port,
                ))
            })
            .collect())
    }

    /// `(numInputs, numOutputs)` for a filter; both 0 before its
    /// stream's first successful ready.
    pub fn filter_port_counts(&self, id: FilterId) -> Result<(u32, u32)> {
        self.filters
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|e| (e.n_in, e.n_out))
            .ok_or_else(|| Error::LifecycleMisuse("no such filter".into()).record())
    }

    /// Filters referenced by the stream's connections, in load order.
    pub(crate) fn stream_participants(&self, sid: StreamId) -> Vec<FilterId> {
        let mut ids: Vec<usize> = Vec::new();
        for c in &self.streams[sid.0].connections {
            for id in [c.from.0, c.to.0] {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        ids.into_iter().map(FilterId).collect()
    }

    pub(crate) fn stream(&self, sid: StreamId) -> Result<&Stream> {
        self.streams
            .get(sid.0)
            .ok_or_else(|| Error::LifecycleMisuse("no such stream".into()).record())
    }

    pub(crate) fn stream_mut(&mut self, sid: StreamId) -> Result<&mut Stream> {
        self.streams
            .get_mut(sid.0)
            .ok_or_else(|| Error::LifecycleMisuse("no such stream".into()).record())
    }

    // ----------------------------------------------------------------
    // Parameters
    // ----------------------------------------------------------------

    /// Create a parameter on a filter. Not allowed while the filter's
    /// stream is flowing.
    pub fn parameter_create_filter(
        &self,
        id: FilterId,
        name: &str,
        ptype: ParamType,
        set_cb: Option<Arc<SetFn>>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        let entry = self
            .filters
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::LifecycleMisuse("no such filter".into()).record())?;
        if let Some(si) = entry.stream {
            if self.streams[si].flags.contains(StreamFlags::LAUNCHED) {
                return Err(Error::LifecycleMisuse(
                    "parameters cannot be added while the stream is flowing".into(),
                )
                .record());
            }
        }
        entry.params.create(name, ptype, set_cb, cleanup)
    }

    /// Request a change to a filter's parameter.
    pub fn parameter_set_filter(&self, id: FilterId, name: &str, value: Value) -> Result<()> {
        self.filter_params(id)?.set(name, value)
    }

    /// Register a get-callback on a filter's parameter(s).
    pub fn parameter_get_filter(
        &self,
        id: FilterId,
        name_or_regex: &str,
        ptype: Option<ParamType>,
        cb: Arc<GetFn>,
        flags: GetFlags,
    ) -> Result<usize> {
        self.filter_params(id)?.add_getter(name_or_regex, ptype, cb, flags)
    }

    /// Request a change to a controller's parameter.
    pub fn parameter_set_controller(&self, ctl: &str, name: &str, value: Value) -> Result<()> {
        self.controller_params(ctl)?.set(name, value)
    }

    /// Register a get-callback on a controller's parameter(s).
    pub fn parameter_get_controller(
        &self,
        ctl: &str,
        name_or_regex: &str,
        ptype: Option<ParamType>,
        cb: Arc<GetFn>,
        flags: GetFlags,
    ) -> Result<usize> {
        self.controller_params(ctl)?.add_getter(name_or_regex, ptype, cb, flags)
    }

    /// Remove filter parameters by exact name or regex.
    pub fn parameter_remove_filter(
        &self,
        id: FilterId,
        name_or_regex: &str,
        is_regex: bool,
    ) -> Result<usize> {
        self.filter_params(id)?.remove(name_or_regex, is_regex)
    }

    /// Walk matching parameters across filters and controllers. Any
    /// scope argument may be `None` to widen. The visitor returns
    /// non-zero to stop the walk. Returns the number of parameters
    /// visited.
    pub fn parameter_for_each(
        &self,
        stream: Option<StreamId>,
        owner_name: Option<&str>,
        name_regex: Option<&str>,
        ptype: Option<ParamType>,
        visitor: &mut dyn FnMut(&ForEachItem<'_>) -> i32,
    ) -> Result<usize> {
        let re = match name_regex {
            Some(pat) => {
                Some(regex::Regex::new(pat).map_err(|e| Error::BadRegex(e.to_string()).record())?)
            }
            None => None,
        };
        let mut visited = 0;

        for entry in self.filters.iter().flatten() {
            if let Some(sid) = stream {
                if entry.stream != Some(sid.0) {
                    continue;
                }
            }
            if owner_name.is_some_and(|n| n != entry.name) {
                continue;
            }
            for (pname, pt, _) in entry.params.list() {
                if ptype.is_some_and(|t| t != pt) {
                    continue;
                }
                if re.as_ref().is_some_and(|re| !re.is_match(&pname)) {
                    continue;
                }
                visited += 1;
                let item = ForEachItem {
                    owner_kind: OwnerKind::Filter,
                    owner_name: &entry.name,
                    stream: entry.stream.map(StreamId),
                    name: &pname,
                    ptype: pt,
                };
                if visitor(&item) != 0 {
                    return Ok(visited);
                }
            }
        }

        if stream.is_none() {
            for entry in self.controllers.iter().flatten() {
                if owner_name.is_some_and(|n| n != entry.name) {
                    continue;
                }
                for (pname, pt, _) in entry.params.list() {
                    if ptype.is_some_and(|t| t != pt) {
                        continue;
                    }
                    if re.as_ref().is_some_and(|re| !re.is_match(&pname)) {
                        continue;
                    }
                    visited += 1;
                    let item = ForEachItem {
                        owner_kind: OwnerKind::Controller,
                        owner_name: &entry.name,
                        stream: None,
                        name: &pname,
                        ptype: pt,
                    };
                    if visitor(&item) != 0 {
                        return Ok(visited);
                    }
                }
            }
        }
        Ok(visited)
    }

    fn filter_params(&self, id: FilterId) -> Result<Arc<OwnerCell>> {
        self.filters
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|e| e.params.clone())
            .ok_or_else(|| Error::LifecycleMisuse("no such filter".into()).record())
    }

    fn controller_params(&self, name: &str) -> Result<Arc<OwnerCell>> {
        self.controllers
            .iter()
            .flatten()
            .find(|c| c.name == name)
            .map(|c| c.params.clone())
            .ok_or_else(|| Error::Parameter(format!("controller \"{name}\" not found")).record())
    }
}

/// One parameter seen by [`App::parameter_for_each`].
pub struct ForEachItem<'a> {
    pub owner_kind: OwnerKind,
    pub owner_name: &'a str,
    pub stream: Option<StreamId>,
    pub name: &'a str,
    pub ptype: ParamType,
}

impl Drop for App {
    fn drop(&mut self) {
        // Make sure no worker threads outlive the app.
        for si in 0..self.streams.len() {
            if self.streams[si].flags.contains(StreamFlags::LAUNCHED) {
                let _ = self.stream_stop(StreamId(si));
            }
        }
        // Children go away in reverse load order.
        for entry in self.controllers.iter_mut().rev().filter_map(Option::take) {
            entry.module.destroy();
            entry.params.destroy_all();
        }
        for entry in self.filters.iter_mut().rev().filter_map(Option::take) {
            entry.module.destroy();
            entry.params.destroy_all();
        }
    }
}

// --------------------------------------------------------------------
// Module-facing contexts that need the app
// --------------------------------------------------------------------

/// What a filter's `construct` may do: read its arguments, create
/// parameters, and load further filters or edges. Readiness is not
/// reachable from here.
pub struct ConstructContext<'a> {
    pub(crate) app: &'a mut App,
    pub(crate) owner: Arc<OwnerCell>,
    pub(crate) args: Vec<String>,
    pub(crate) self_id: FilterId,
}

impl ConstructContext<'_> {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn filter_id(&self) -> FilterId {
        self.self_id
    }

    /// Load another filter module (re-entrant loads are allowed from
    /// `construct`).
    pub fn load_filter(&mut self, spec: &str, args: &[String]) -> Result<FilterId> {
        self.app.load_filter(spec, args)
    }

    pub fn connect(&mut self, sid: StreamId, from: FilterId, to: FilterId) -> Result<()> {
        self.app.connect(sid, from, to)
    }

    pub fn plug(
        &mut self,
        sid: StreamId,
        from: FilterId,
        from_port: u32,
        to: FilterId,
        to_port: u32,
    ) -> Result<()> {
        self.app.plug(sid, from, from_port, to, to_port)
    }

    /// Create a parameter owned by this filter.
    pub fn parameter_create(
        &self,
        name: &str,
        ptype: ParamType,
        set_cb: Option<Arc<SetFn>>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        self.owner.create(name, ptype, set_cb, cleanup)
    }
}

/// What a controller's `construct` may do.
pub struct ControllerConstructContext<'a> {
    pub(crate) app: &'a mut App,
    pub(crate) owner: Arc<OwnerCell>,
    pub(crate) args: Vec<String>,
}

impl ControllerConstructContext<'_> {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn load_filter(&mut self, spec: &str, args: &[String]) -> Result<FilterId> {
        self.app.load_filter(spec, args)
    }

    /// Create a parameter owned by this controller.
    pub fn parameter_create(
        &self,
        name: &str,
        ptype: ParamType,
        set_cb: Option<Arc<SetFn>>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        self.owner.create(name, ptype, set_cb, cleanup)
    }
}

/// Context for controller lifecycle hooks (`preStart`/`postStart`/
/// `preStop`/`postStop`).
pub struct HookContext<'a> {
    pub(crate) app: &'a mut App,
    pub(crate) controller: String,
    pub(crate) controller_params: Arc<OwnerCell>,
    pub(crate) stream: StreamId,
}

impl HookContext<'_> {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn controller_name(&self) -> &str {
        &self.controller
    }

    /// Register (or replace) this controller's post-input callback on a
    /// filter. The scheduler invokes it after every `input()` call.
    pub fn add_post_filter_input(&mut self, filter: FilterId, cb: Box<PostInputFn>) -> Result<()> {
        let controller = self.controller.clone();
        let entry = self
            .app
            .filters
            .get_mut(filter.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::LifecycleMisuse("no such filter".into()).record())?;
        entry.post_input.insert(
            controller,
            Arc::new(PostInputHook {
                cb,
                retire: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    /// Create a parameter owned by this controller.
    pub fn parameter_create(
        &self,
        name: &str,
        ptype: ParamType,
        set_cb: Option<Arc<SetFn>>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        self.controller_params.create(name, ptype, set_cb, cleanup)
    }

    /// Publish one of this controller's own parameters.
    pub fn parameter_push(&self, name: &str, value: Value) -> Result<usize> {
        self.controller_params.push(name, value)
    }

    /// Register a get-callback on a filter's parameter(s).
    pub fn parameter_get(
        &self,
        filter: FilterId,
        name_or_regex: &str,
        ptype: Option<ParamType>,
        cb: Arc<GetFn>,
        flags: GetFlags,
    ) -> Result<usize> {
        self.app.parameter_get_filter(filter, name_or_regex, ptype, cb, flags)
    }

    /// Request a change to a filter's parameter.
    pub fn parameter_set(&self, filter: FilterId, name: &str, value: Value) -> Result<()> {
        self.app.parameter_set_filter(filter, name, value)
    }
}
