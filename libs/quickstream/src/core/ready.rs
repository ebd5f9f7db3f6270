//! Graph readiness
//!
//! Transforms a stream's raw connection list into a runnable graph.
//! The stages run in order, each a barrier:
//!
//! 1. source discovery,
//! 2. cycle check (bounded DFS) unless loops are allowed,
//! 3. output port assignment and reader allocation,
//! 4. input port assignment and coverage check,
//! 5. controller `preStart` hooks, then filter `start()`s under a
//!    [`StartContext`],
//! 6. buffer resolution (defaults, pass-through chains),
//! 7. ring sizing and mapping,
//! 8. controller `postStart` hooks.
//!
//! Failure at any stage drops everything the call built; nothing is
//! committed to the stream until the end.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::app::{App, HookContext};
use super::context::{self, StartContext};
use super::controller::FilterHookInfo;
use super::error::{Error, Result};
use super::filter::{FilterId, FilterState};
use super::job::JobPool;
use super::ports::{Output, Reader, ReaderRef};
use super::ring::RingBuffer;
use super::scheduler::{RunFilter, Runtime};
use super::stream::{Connection, StreamFlags, StreamId, NEXT_PORT};

/// Longest path length that can exist in an acyclic graph with this
/// many edges; anything longer means a loop.
fn count_path(conns: &[Connection], from: usize, depth: u32, max: u32) -> u32 {
    if depth > max {
        // Already longer than any acyclic path could be; stop
        // recursing.
        return depth;
    }
    let depth = depth + 1;
    let mut longest = depth;
    for c in conns {
        if c.from.0 == from {
            longest = longest.max(count_path(conns, c.to.0, depth, max));
        }
    }
    longest
}

pub(crate) fn ready(app: &mut App, sid: StreamId) -> Result<()> {
    let si = sid.0;
    if app.streams[si].is_ready() {
        return Err(Error::LifecycleMisuse("stream is already set up".into()).record());
    }
    if app.streams[si].connections.is_empty() {
        return Err(Error::NoSources.record());
    }
    let mut conns: Vec<Connection> = app.streams[si].connections.clone();

    // Participating filters in load order.
    let mut fids: Vec<usize> = Vec::new();
    for c in &conns {
        for id in [c.from.0, c.to.0] {
            if !fids.contains(&id) {
                fids.push(id);
            }
        }
    }
    fids.sort_unstable();

    // ---- Stage 1: source discovery ---------------------------------
    let source_fids: Vec<usize> = fids
        .iter()
        .copied()
        .filter(|&f| {
            conns.iter().any(|c| c.from.0 == f) && !conns.iter().any(|c| c.to.0 == f)
        })
        .collect();
    if source_fids.is_empty() {
        error!("this stream has no sources");
        return Err(Error::NoSources.record());
    }

    // ---- Stage 2: cycle check ---------------------------------------
    if !app.streams[si].flags.contains(StreamFlags::ALLOW_LOOPS) {
        let max = conns.len() as u32 + 1;
        for &s in &source_fids {
            if count_path(&conns, s, 0, max) > max {
                error!("stream has loops in it; consider allow_loops()");
                return Err(Error::HasLoops.record());
            }
        }
    }

    let idx_of: HashMap<usize, usize> =
        fids.iter().enumerate().map(|(i, &f)| (f, i)).collect();

    // Skeleton run records, in load order.
    let mut rfs: Vec<RunFilter> = fids
        .iter()
        .map(|&fid| {
            let entry = app.entry(FilterId(fid));
            RunFilter {
                fid,
                name: entry.name.clone(),
                module: entry.module.clone(),
                owner: entry.params.clone(),
                max_threads: entry.max_threads,
                n_in: 0,
                n_out: 0,
                is_source: false,
                finished: false,
                outputs: Vec::new(),
                inputs: Vec::new(),
                pool: JobPool::new(1, 0, 0),
                statics: None,
            }
        })
        .collect();

    // ---- Stage 3: output port assignment ----------------------------
    // Which reader record each connection produced, for stage 4.
    let mut conn_reader: Vec<Option<ReaderRef>> = vec![None; conns.len()];
    for (ri, &fid) in fids.iter().enumerate() {
        let mut count: u32 = 0;
        for c in conns.iter_mut().filter(|c| c.from.0 == fid) {
            if c.from_port == NEXT_PORT || c.from_port == count {
                if c.from_port == NEXT_PORT {
                    c.from_port = count;
                }
                count += 1;
            } else if c.from_port > count {
                warn!(
                    "filter \"{}\" has output port number {} out of sequence; setting it to {}",
                    rfs[ri].name, c.from_port, count
                );
                c.from_port = count;
                count += 1;
            }
            // from_port < count shares an already-open port.
        }
        rfs[ri].n_out = count;
        rfs[ri].outputs = (0..count).map(|_| Output::new()).collect();

        for (ci, c) in conns.iter().enumerate() {
            if c.from.0 != fid {
                continue;
            }
            let port = c.from_port as usize;
            let consumer = idx_of[&c.to.0];
            let reader_idx = rfs[ri].outputs[port].readers.len();
            // The input port may still be the sentinel; stage 4
            // resolves it.
            rfs[ri].outputs[port]
                .readers
                .push(Reader::new(consumer, c.to_port));
            conn_reader[ci] = Some(ReaderRef {
                feeder: ri,
                out_port: c.from_port,
                reader_idx,
            });
        }
    }

    // ---- Stage 4: input port assignment -----------------------------
    for (ri, &fid) in fids.iter().enumerate() {
        let incoming: Vec<(usize, ReaderRef)> = conns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.to.0 == fid)
            .map(|(ci, _)| (ci, conn_reader[ci].expect("stage 3 filled every connection")))
            .collect();
        let n_in = incoming.len() as u32;
        let mut seen = vec![0u32; n_in as usize];

        for (seq, &(ci, rr)) in incoming.iter().enumerate() {
            let assigned = if conns[ci].to_port == NEXT_PORT {
                seq as u32
            } else {
                conns[ci].to_port
            };
            conns[ci].to_port = assigned;
            rfs[rr.feeder].outputs[rr.out_port as usize].readers[rr.reader_idx].input_port =
                assigned;
            if assigned < n_in {
                seen[assigned as usize] += 1;
            }
        }
        if seen.iter().any(|&c| c != 1) {
            let name = rfs[ri].name.clone();
            error!("filter \"{name}\" has some bad input port numbers");
            return Err(Error::BadPortNumbering(format!(
                "filter \"{name}\" input ports do not cover 0..{n_in} exactly once"
            ))
            .record());
        }

        rfs[ri].n_in = n_in;
        rfs[ri].inputs = vec![
            ReaderRef {
                feeder: 0,
                out_port: 0,
                reader_idx: 0
            };
            n_in as usize
        ];
        for &(ci, rr) in &incoming {
            rfs[ri].inputs[conns[ci].to_port as usize] = rr;
        }
    }

    // Source marks, thread clamp, job pools.
    let mut sources: Vec<usize> = Vec::new();
    for (ri, &fid) in fids.iter().enumerate() {
        if source_fids.contains(&fid) {
            rfs[ri].is_source = true;
            sources.push(ri);
        }
        if rfs[ri].max_threads > 1 {
            // Concurrent input() calls would share one read cursor per
            // port with no defined consumption order; serialized until
            // that has defined semantics.
            warn!(
                "filter \"{}\": multi-threaded input() is not supported over shared \
                 cursors; running single-threaded",
                rfs[ri].name
            );
            rfs[ri].max_threads = 1;
        }
        rfs[ri].pool = JobPool::new(
            rfs[ri].max_threads,
            rfs[ri].n_in as usize,
            rfs[ri].n_out as usize,
        );
    }

    let infos: Vec<(FilterId, String, u32, u32)> = rfs
        .iter()
        .map(|rf| (FilterId(rf.fid), rf.name.clone(), rf.n_in, rf.n_out))
        .collect();

    // ---- Stage 5a: controller preStart hooks ------------------------
    run_controller_hooks(app, sid, &infos, HookPhase::PreStart);

    // ---- Stage 5b: filter start() -----------------------------------
    for ri in 0..rfs.len() {
        let fid = FilterId(rfs[ri].fid);
        let module = rfs[ri].module.clone();
        let owner = rfs[ri].owner.clone();
        let mut sctx = StartContext::new(rfs[ri].n_in, rfs[ri].n_out);

        app.entry_mut(fid).state = FilterState::InStart;
        app.streams[si].flags.insert(StreamFlags::STARTING);
        let ret = context::with_owner(owner, || module.start(&mut sctx));
        app.streams[si].flags.remove(StreamFlags::STARTING);
        app.entry_mut(fid).state = FilterState::Idle;

        if ret != 0 {
            let name = rfs[ri].name.clone();
            error!("filter \"{name}\" start()={ret} failed");
            return Err(Error::StartFailure {
                filter: name,
                code: ret,
            }
            .record());
        }

        // Apply the declarations collected by the context.
        for p in 0..rfs[ri].n_in as usize {
            let rr = rfs[ri].inputs[p];
            if let Some(t) = sctx.thresholds[p] {
                rfs[rr.feeder].outputs[rr.out_port as usize].readers[rr.reader_idx].threshold =
                    t;
            }
            if let Some(pr) = sctx.promises[p] {
                rfs[rr.feeder].outputs[rr.out_port as usize].readers[rr.reader_idx].promise =
                    pr;
            }
        }
        for (o, mw) in sctx.max_writes.iter().enumerate() {
            if let Some(mw) = mw {
                rfs[ri].outputs[o].max_write = *mw;
                rfs[ri].outputs[o].explicit = true;
            }
        }
        for &(in_port, out_port, mw) in &sctx.pass_through {
            let out = &mut rfs[ri].outputs[out_port as usize];
            out.pass_through_from = Some(in_port);
            out.max_write = mw;
            out.explicit = true;
        }
    }

    // ---- Stages 6 + 7: buffer resolution and ring mapping -----------
    map_buffers(&mut rfs)?;

    // ---- Stage 8: controller postStart hooks ------------------------
    run_controller_hooks(app, sid, &infos, HookPhase::PostStart);

    // Commit: resolved ports, final counts, the runtime.
    for rf in &rfs {
        let e = app.entry_mut(FilterId(rf.fid));
        e.n_in = rf.n_in;
        e.n_out = rf.n_out;
    }
    app.streams[si].connections = conns;
    app.streams[si].runtime = Some(Runtime {
        filters: rfs,
        sources,
    });
    debug!("stream {si} is ready");
    Ok(())
}

/// Stages 6 and 7: every output gets a ring. Pass-through outputs share
/// the ring of the output feeding their declared input port; everyone
/// else roots a ring of their own. Sizing guarantees the writer can
/// always absorb one max-write without reaching the slowest reader's
/// promised window.
fn map_buffers(rfs: &mut [RunFilter]) -> Result<()> {
    // Resolve each output to its chain root.
    let mut members: HashMap<(usize, usize), Vec<(usize, usize)>> = HashMap::new();

    for ri in 0..rfs.len() {
        for o in 0..rfs[ri].outputs.len() {
            let mut cur = (ri, o);
            let mut hops = 0usize;
            let root = loop {
                match rfs[cur.0].outputs[cur.1].pass_through_from {
                    None => break cur,
                    Some(in_port) => {
                        let rr = rfs[cur.0].inputs[in_port as usize];
                        cur = (rr.feeder, rr.out_port as usize);
                        hops += 1;
                        if hops > rfs.len() {
                            return Err(Error::LifecycleMisuse(
                                "pass-through declarations form a loop".into(),
                            )
                            .record());
                        }
                    }
                }
            };
            members.entry(root).or_default().push((ri, o));
        }
    }

    for ((root_ri, root_o), group) in &members {
        if group.len() > 1 {
            // In-place rewriting clobbers the bytes other readers of
            // the same upstream port would still read.
            for &(ri, o) in group {
                if rfs[ri].outputs[o].readers.len() > 1
                    && group.iter().any(|&(mri, mo)| {
                        rfs[mri].outputs[mo]
                            .pass_through_from
                            .map(|p| rfs[mri].inputs[p as usize])
                            .is_some_and(|rr| rr.feeder == ri && rr.out_port as usize == o)
                    })
                {
                    warn!(
                        "filter \"{}\" output {o}: pass-through consumer shares the \
                         buffer with other readers",
                        rfs[ri].name
                    );
                }
            }
        }

        // Per-member usable length. Each chain level can hold up to
        // usable-1 bytes unconsumed plus one in-flight max-write, and
        // the levels' unread spans stack in the shared ring, so the
        // mapping takes their sum.
        let mut map_req = 0usize;
        let mut usable: Vec<(usize, usize, usize)> = Vec::with_capacity(group.len());
        for &(ri, o) in group {
            let out = &rfs[ri].outputs[o];
            let reader_need = out
                .readers
                .iter()
                .map(|r| r.promise + r.threshold)
                .max()
                .unwrap_or(0);
            let u = out.max_write.max(reader_need);
            map_req += u + out.max_write;
            usable.push((ri, o, u));
        }

        let ring = Arc::new(RingBuffer::new(map_req, map_req)?);
        debug!(
            "mapped {} byte ring (+{} overhang) for filter \"{}\" output {root_o}",
            ring.map_len(),
            ring.overhang(),
            rfs[*root_ri].name
        );
        for (ri, o, u) in usable {
            let out = &mut rfs[ri].outputs[o];
            out.ring = Some(ring.clone());
            out.usable_len = u;
            out.write_off = 0;
            for r in &mut out.readers {
                r.read_off = 0;
                r.readable = 0;
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum HookPhase {
    PreStart,
    PostStart,
    PreStop,
    PostStop,
}

/// Drive one controller hook for every filter of the stream. Start-side
/// phases run controllers in load order, stop-side in reverse load
/// order; a non-zero return skips the controller's remaining filters.
pub(crate) fn run_controller_hooks(
    app: &mut App,
    sid: StreamId,
    infos: &[(FilterId, String, u32, u32)],
    phase: HookPhase,
) {
    let mut ctls: Vec<(String, Arc<dyn super::controller::ControllerModule>, Arc<super::parameter::OwnerCell>)> =
        app.controllers
            .iter()
            .flatten()
            .map(|c| (c.name.clone(), c.module.clone(), c.params.clone()))
            .collect();
    if matches!(phase, HookPhase::PreStop | HookPhase::PostStop) {
        ctls.reverse();
    }

    for (name, module, params) in ctls {
        let mut ret = 0;
        for (fid, fname, n_in, n_out) in infos {
            let info = FilterHookInfo {
                name: fname,
                id: *fid,
                n_in: *n_in,
                n_out: *n_out,
            };
            let mut ctx = HookContext {
                app: &mut *app,
                controller: name.clone(),
                controller_params: params.clone(),
                stream: sid,
            };
            ret = context::with_owner(params.clone(), || match phase {
                HookPhase::PreStart => module.pre_start(&mut ctx, &info),
                HookPhase::PostStart => module.post_start(&mut ctx, &info),
                HookPhase::PreStop => module.pre_stop(&mut ctx, &info),
                HookPhase::PostStop => module.post_stop(&mut ctx, &info),
            });
            if ret != 0 {
                break;
            }
        }
        if ret < 0 {
            error!("controller \"{name}\" {phase:?}() returned ({ret}) error");
        }
    }
}
