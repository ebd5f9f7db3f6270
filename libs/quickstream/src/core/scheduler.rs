//! The job scheduler and worker pool
//!
//! Threads flow through the graph; filters do not own threads. A worker
//! pops a job off the stream queue, runs the filter's `input()` with no
//! lock held, then takes the stream mutex to reconcile cursors, retire
//! finished filters, and enqueue whichever neighbors became runnable.
//! Frameworks that pin threads to filters are only optimal when filter
//! loads are balanced; letting workers go where the work is balances
//! automatically.
//!
//! Everything mutable lives in [`Sched`] behind the one stream mutex.
//! The bytes themselves are touched outside the mutex: buffer sizing
//! guarantees the writer's window and every reader's window never
//! overlap, so the byte path is lock-free.
//!
//! Shutdown is the all-idle handshake: a worker that finds the queue
//! empty while every other worker is already idle declares the flow
//! over, and the last one out signals the master condvar that
//! [`FlowCore::wait`] parks on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::context::{self, InputContext};
use super::controller::{PostInputHook, PostInputReport};
use super::filter::FilterModule;
use super::job::{Job, JobPool};
use super::parameter::OwnerCell;
use super::ports::{Output, ReaderRef};
use super::ring::RingBuffer;

/// Flow-time record for one filter, built by readiness.
pub(crate) struct RunFilter {
    /// `FilterId.0` of the app-side entry.
    pub fid: usize,
    pub name: String,
    pub module: Arc<dyn FilterModule>,
    pub owner: Arc<OwnerCell>,
    /// Effective bound on concurrent `input()` calls.
    pub max_threads: u32,
    pub n_in: u32,
    pub n_out: u32,
    pub is_source: bool,
    pub finished: bool,
    pub outputs: Vec<Output>,
    /// Per input port: where the feeding reader record lives.
    pub inputs: Vec<ReaderRef>,
    pub pool: JobPool,
    /// Immutable per-filter data cloned into each dispatch; set at
    /// launch.
    pub statics: Option<Arc<FilterStatics>>,
}

/// What readiness hands to launch.
pub(crate) struct Runtime {
    pub filters: Vec<RunFilter>,
    pub sources: Vec<usize>,
}

/// Per-filter data a worker needs while running `input()` unlocked.
pub(crate) struct FilterStatics {
    pub name: String,
    pub module: Arc<dyn FilterModule>,
    pub owner: Arc<OwnerCell>,
    pub n_in: u32,
    pub n_out: u32,
    /// Ring feeding each input port.
    pub in_rings: Vec<Arc<RingBuffer>>,
    /// Ring behind each output port.
    pub out_rings: Vec<Arc<RingBuffer>>,
    pub max_writes: Vec<usize>,
    /// Read promise per input port.
    pub promises: Vec<usize>,
    /// Post-input callbacks, snapshotted at launch.
    pub hooks: Vec<Arc<PostInputHook>>,
}

/// A dispatched job: the pooled argument record moved out of the pool
/// plus the filter statics, owned by one worker with no lock held.
struct LocalJob {
    job: Job,
    statics: Arc<FilterStatics>,
}

pub(crate) struct Sched {
    pub filters: Vec<RunFilter>,
    pub sources: Vec<usize>,
    /// FIFO of `(filter, job)` ready for any worker.
    queue: VecDeque<(usize, usize)>,
    /// Threads counted at spawn time by the spawner.
    num_threads: u32,
    /// Threads counted after they took the stream mutex.
    num_workers: u32,
    num_idle: u32,
    master_waiting: bool,
}

impl Sched {
    fn reader(&self, rr: ReaderRef) -> &super::ports::Reader {
        &self.filters[rr.feeder].outputs[rr.out_port as usize].readers[rr.reader_idx]
    }

    fn reader_mut(&mut self, rr: ReaderRef) -> &mut super::ports::Reader {
        &mut self.filters[rr.feeder].outputs[rr.out_port as usize].readers[rr.reader_idx]
    }

    /// The eligibility predicate: can this filter's `input()` be queued
    /// right now?
    fn callable(&self, fi: usize, is_sourcing: i64) -> bool {
        let f = &self.filters[fi];
        if f.finished || !f.pool.has_spare() {
            return false;
        }
        if f.pool.num_working() as u32 >= f.max_threads {
            return false;
        }
        // A clogged output reader would let the writer overrun the read
        // cursor.
        for out in &f.outputs {
            for r in &out.readers {
                if r.readable >= out.usable_len {
                    return false;
                }
            }
        }
        if f.n_in == 0 {
            return is_sourcing > 0;
        }
        // One satisfied input is enough; a filter wanting more returns
        // 0 from input() and gets called again later.
        for rr in &f.inputs {
            let r = self.reader(*rr);
            if r.readable >= r.threshold {
                return true;
            }
            // Final bytes from a finished feeder are delivered below
            // threshold.
            if self.filters[rr.feeder].finished && r.readable > 0 {
                return true;
            }
        }
        false
    }

    /// Stage → stream queue (refilling the stage from the unused
    /// stack). Caller must have checked eligibility.
    fn enqueue(&mut self, fi: usize) {
        let job = self.filters[fi].pool.stage_to_queue();
        self.queue.push_back((fi, job));
    }

    /// Is any job for `fi` sitting in the stream queue?
    fn queued(&self, fi: usize) -> bool {
        self.queue.iter().any(|&(f, _)| f == fi)
    }
}

pub(crate) struct FlowCore {
    sched: Mutex<Sched>,
    jobs_cond: Condvar,
    master_cond: Condvar,
    /// Source filters run while this is positive. Plain atomic so
    /// signal handlers may decrement it.
    is_sourcing: AtomicI64,
    /// Worker bound for this launch (at least 1; a launch with 0 runs
    /// the lone worker on the caller).
    max_threads: u32,
}

impl FlowCore {
    /// Build the flow state, seed the source jobs, and start workers.
    /// With `max_threads == 0` the whole flow runs on the calling
    /// thread and is complete when this returns.
    pub(crate) fn launch(
        mut runtime: Runtime,
        max_threads: u32,
        hooks: Vec<Vec<Arc<PostInputHook>>>,
    ) -> Arc<FlowCore> {
        debug_assert_eq!(hooks.len(), runtime.filters.len());

        // Freeze the per-filter statics now that buffers are mapped and
        // post-input hooks are registered.
        let statics: Vec<Arc<FilterStatics>> = runtime
            .filters
            .iter()
            .zip(&hooks)
            .map(|(f, hooks)| {
                let in_rings = f
                    .inputs
                    .iter()
                    .map(|rr| {
                        runtime.filters[rr.feeder].outputs[rr.out_port as usize]
                            .ring
                            .clone()
                            .expect("readiness mapped every buffer")
                    })
                    .collect();
                let promises = f
                    .inputs
                    .iter()
                    .map(|rr| {
                        runtime.filters[rr.feeder].outputs[rr.out_port as usize].readers
                            [rr.reader_idx]
                            .promise
                    })
                    .collect();
                Arc::new(FilterStatics {
                    name: f.name.clone(),
                    module: f.module.clone(),
                    owner: f.owner.clone(),
                    n_in: f.n_in,
                    n_out: f.n_out,
                    in_rings,
                    out_rings: f
                        .outputs
                        .iter()
                        .map(|o| o.ring.clone().expect("readiness mapped every buffer"))
                        .collect(),
                    max_writes: f.outputs.iter().map(|o| o.max_write).collect(),
                    promises,
                    hooks: hooks.clone(),
                })
            })
            .collect();
        for (f, s) in runtime.filters.iter_mut().zip(statics) {
            f.statics = Some(s);
        }

        let core = Arc::new(FlowCore {
            sched: Mutex::new(Sched {
                filters: runtime.filters,
                sources: runtime.sources,
                queue: VecDeque::new(),
                num_threads: 0,
                num_workers: 0,
                num_idle: 0,
                master_waiting: false,
            }),
            jobs_cond: Condvar::new(),
            master_cond: Condvar::new(),
            is_sourcing: AtomicI64::new(1),
            max_threads: max_threads.max(1),
        });

        let inline = max_threads == 0;
        {
            let mut g = core.sched.lock();
            let sources = g.sources.clone();
            for s in sources {
                if g.callable(s, 1) {
                    g.enqueue(s);
                }
            }
            if inline {
                g.num_threads = 1;
            } else {
                // One worker per seeded source, up to the bound; more
                // come up on demand.
                let n = (g.queue.len() as u32).min(max_threads);
                for _ in 0..n {
                    spawn_worker(&core, &mut g);
                }
            }
        }

        if inline {
            worker_main(core.clone());
        }

        core
    }

    /// Park the master until the workers are gone. Returns false
    /// immediately when there is nothing to wait on.
    pub(crate) fn wait(&self) -> bool {
        let mut g = self.sched.lock();
        if g.num_threads == 0 {
            return false;
        }
        g.master_waiting = true;
        while g.num_threads > 0 {
            self.master_cond.wait(&mut g);
        }
        g.master_waiting = false;
        true
    }

    /// Stop enqueueing source filters; queued work drains naturally.
    /// Atomic-only so it may be called from a signal handler.
    pub(crate) fn stop_sources(&self) {
        self.is_sourcing.fetch_sub(1, Ordering::Relaxed);
    }

    /// Read access to the scheduler state (dot rendering, tests).
    pub(crate) fn with_sched<R>(&self, f: impl FnOnce(&Sched) -> R) -> R {
        f(&self.sched.lock())
    }
}

/// Cheap clonable handle for ending a flow from controllers or signal
/// handlers.
#[derive(Clone)]
pub struct SourceStopper {
    pub(crate) core: Arc<FlowCore>,
}

impl SourceStopper {
    pub fn stop(&self) {
        self.core.stop_sources();
    }
}

fn spawn_worker(core: &Arc<FlowCore>, g: &mut Sched) {
    g.num_threads += 1;
    let core = core.clone();
    let spawned = thread::Builder::new()
        .name("qs-worker".into())
        .spawn(move || worker_main(core));
    if let Err(e) = spawned {
        warn!("failed to spawn worker thread: {e}");
        g.num_threads -= 1;
    }
}

/// Dequeue work, sleeping on the jobs condvar when there is none.
/// Returns `None` when every other worker is idle over an empty queue:
/// the flow is over.
fn get_work(core: &FlowCore, g: &mut MutexGuard<'_, Sched>) -> Option<(usize, usize)> {
    loop {
        if let Some((fi, ji)) = g.queue.pop_front() {
            g.filters[fi].pool.queue_to_working(ji);
            return Some((fi, ji));
        }
        if g.num_idle == g.num_threads - 1 {
            return None;
        }
        g.num_idle += 1;
        core.jobs_cond.wait(g);
        g.num_idle -= 1;
        if g.num_idle == g.num_threads - 1 && g.queue.is_empty() {
            return None;
        }
    }
}

/// Snapshot the filter's cursors into its pooled job and take the job
/// out of the pool for lock-free use.
fn dispatch(g: &mut Sched, fi: usize, ji: usize) -> LocalJob {
    let statics = g.filters[fi]
        .statics
        .clone()
        .expect("statics are set at launch");
    let n_in = statics.n_in as usize;
    let n_out = statics.n_out as usize;

    let mut job = std::mem::take(g.filters[fi].pool.job_mut(ji));
    let inputs = g.filters[fi].inputs.clone();
    for p in 0..n_in {
        let rr = inputs[p];
        let feeder_finished = g.filters[rr.feeder].finished;
        let r = g.reader(rr);
        job.in_offs[p] = r.read_off;
        job.in_lens[p] = r.readable;
        job.in_flush[p] = feeder_finished;
        job.advance[p] = 0;
    }
    for o in 0..n_out {
        job.out_offs[o] = g.filters[fi].outputs[o].write_off;
        job.out_lens[o] = 0;
    }

    LocalJob { job, statics }
}

/// Mark a filter done for this flow cycle and withdraw any of its jobs
/// still sitting in the stream queue.
fn retire(g: &mut Sched, fi: usize, input_ret: i32) {
    if input_ret < 0 {
        warn!(
            "filter \"{}\" input() returned error code {input_ret}",
            g.filters[fi].name
        );
    }
    if g.filters[fi].finished {
        return;
    }
    debug!(
        "filter \"{}\" is done with this flow cycle (input() returned {input_ret})",
        g.filters[fi].name
    );
    g.filters[fi].finished = true;

    let mut withdrawn = Vec::new();
    g.queue.retain(|&(f, j)| {
        if f == fi {
            withdrawn.push(j);
            false
        } else {
            true
        }
    });
    for j in withdrawn {
        g.filters[fi].pool.queue_to_unused(j);
    }
}

/// Mark filters that can never run again: sources once sourcing has
/// stopped, and consumers whose feeders are all finished and drained.
/// Downstream then observes `is_flushing` on its final deliveries.
fn propagate_finish(core: &FlowCore, g: &mut Sched) {
    let is_sourcing = core.is_sourcing.load(Ordering::Relaxed);
    loop {
        let mut newly_finished = None;
        for fi in 0..g.filters.len() {
            let f = &g.filters[fi];
            if f.finished || f.pool.num_working() > 0 || g.queued(fi) {
                continue;
            }
            let done = if f.n_in == 0 {
                is_sourcing <= 0
            } else {
                f.inputs
                    .iter()
                    .all(|rr| g.filters[rr.feeder].finished && g.reader(*rr).readable == 0)
            };
            if done {
                newly_finished = Some(fi);
                break;
            }
        }
        match newly_finished {
            Some(fi) => {
                debug!("filter \"{}\" has no more input coming", g.filters[fi].name);
                g.filters[fi].finished = true;
            }
            None => break,
        }
    }
}

/// Post-`input()` reconcile, run under the stream mutex.
///
/// Advances cursors, enforces the read-promise and pass-through
/// contracts, decides whether this worker keeps the same job for
/// another `input()` call, surveys neighbors for new work, and wakes or
/// launches workers to match. Returns whether to call `input()` again
/// with the refreshed job.
fn reconcile(
    core: &Arc<FlowCore>,
    g: &mut Sched,
    fi: usize,
    local: &mut LocalJob,
    input_ret: i32,
) -> bool {
    let statics = &local.statics;
    let n_in = statics.n_in as usize;
    let n_out = statics.n_out as usize;

    // Outputs: publish, advance write cursors, grow reader lengths.
    let mut outputs_hungry = true;
    for o in 0..n_out {
        let wlen = local.job.out_lens[o];
        let ring = &statics.out_rings[o];
        debug_assert!(wlen <= statics.max_writes[o]);
        if wlen > 0 {
            ring.publish(local.job.out_offs[o], wlen);
        }
        let map_len = ring.map_len();
        let out = &mut g.filters[fi].outputs[o];
        out.write_off += wlen;
        if out.write_off >= map_len {
            out.write_off -= map_len;
        }
        for r in &mut out.readers {
            r.readable += wlen;
            // The sizing invariant: a reader can hold at most one
            // max-write past the clog threshold.
            debug_assert!(r.readable <= map_len);
            if r.readable >= out.usable_len {
                outputs_hungry = false;
            }
        }
    }

    // Pass-through ports must move in lock step.
    for o in 0..n_out {
        if let Some(p) = g.filters[fi].outputs[o].pass_through_from {
            assert!(
                local.job.advance[p as usize] == local.job.out_lens[o],
                "filter \"{}\" pass-through pair (in {p}, out {o}) advanced {} but output {}",
                statics.name,
                local.job.advance[p as usize],
                local.job.out_lens[o]
            );
        }
    }

    // Inputs: enforce the read promise, advance read cursors.
    let mut input_advanced = n_in == 0;
    let inputs = g.filters[fi].inputs.clone();
    for p in 0..n_in {
        let adv = local.job.advance[p];
        if adv > 0 {
            input_advanced = true;
        }
        assert!(
            local.job.in_lens[p] < statics.promises[p] || adv > 0,
            "filter \"{}\" did not keep its read promise for input port {p}: \
             offered {} bytes against a promise of {}",
            statics.name,
            local.job.in_lens[p],
            statics.promises[p]
        );
        let map_len = statics.in_rings[p].map_len();
        let r = g.reader_mut(inputs[p]);
        debug_assert!(adv <= r.readable);
        r.read_off += adv;
        if r.read_off >= map_len {
            r.read_off -= map_len;
        }
        r.readable -= adv;
    }

    // Would another input() call have anything to do?
    let mut inputs_feeding = false;
    if outputs_hungry {
        if n_in == 0 {
            inputs_feeding = core.is_sourcing.load(Ordering::Relaxed) > 0;
        } else {
            for (p, rr) in inputs.iter().enumerate() {
                let r = g.reader(*rr);
                if r.readable >= r.threshold
                    || (local.job.in_flush[p] && r.readable > 0)
                {
                    inputs_feeding = true;
                    break;
                }
            }
        }
    }

    let mut cont = true;
    if input_ret != 0 || g.filters[fi].finished {
        cont = false;
        retire(g, fi, input_ret);
    }

    if cont && outputs_hungry && inputs_feeding && input_advanced {
        // Keep the job: refresh its snapshot for the next call.
        for p in 0..n_in {
            let feeder_finished = g.filters[inputs[p].feeder].finished;
            let r = g.reader(inputs[p]);
            local.job.in_offs[p] = r.read_off;
            local.job.in_lens[p] = r.readable;
            local.job.in_flush[p] = feeder_finished;
            local.job.advance[p] = 0;
        }
        for o in 0..n_out {
            local.job.out_offs[o] = g.filters[fi].outputs[o].write_off;
            local.job.out_lens[o] = 0;
        }
    } else {
        cont = false;
    }

    propagate_finish(core, g);

    // Survey: enqueue whoever this call made runnable.
    let is_sourcing = core.is_sourcing.load(Ordering::Relaxed);
    let mut added: u32 = 0;

    let consumers: Vec<usize> = g.filters[fi]
        .outputs
        .iter()
        .flat_map(|o| o.readers.iter().map(|r| r.consumer))
        .collect();
    for c in consumers {
        if g.callable(c, is_sourcing) {
            g.enqueue(c);
            added += 1;
        }
    }
    let feeders: Vec<usize> = inputs.iter().map(|rr| rr.feeder).collect();
    for f2 in feeders {
        if g.callable(f2, is_sourcing) {
            g.enqueue(f2);
            added += 1;
        }
    }
    // Sources, when the pool has spare capacity or would otherwise
    // starve.
    let spare = core.max_threads.saturating_sub(g.num_threads)
        + g.num_idle
        + u32::from(!cont);
    if added < spare || (g.queue.is_empty() && cont) {
        let sources = g.sources.clone();
        for s in sources {
            if g.callable(s, is_sourcing) {
                g.enqueue(s);
                added += 1;
            }
        }
    }

    // This worker frees up if it is not continuing.
    if !cont && added > 0 {
        added -= 1;
    }
    // Workers spawned but not yet through the lock will also pick up
    // queued jobs.
    added = added.saturating_sub(g.num_threads.saturating_sub(g.num_workers));

    if added >= g.num_idle {
        core.jobs_cond.notify_all();
    } else {
        for _ in 0..added {
            core.jobs_cond.notify_one();
        }
    }
    let excess = added.saturating_sub(g.num_idle);
    let to_spawn = excess.min(core.max_threads.saturating_sub(g.num_threads));
    for _ in 0..to_spawn {
        spawn_worker(core, g);
    }

    cont
}

/// The life of a worker thread.
fn worker_main(core: Arc<FlowCore>) {
    let mut g = core.sched.lock();
    g.num_workers += 1;
    debug!(
        "{} of {} worker threads running",
        g.num_workers, core.max_threads
    );

    while let Some((fi, ji)) = get_work(&core, &mut g) {
        let mut local = dispatch(&mut g, fi, ji);
        drop(g);

        // Call input() as long as it is fed and its outputs have room.
        g = loop {
            let statics = local.statics.clone();
            let ret = {
                let mut ctx = InputContext {
                    filter_name: &statics.name,
                    n_in: statics.n_in,
                    n_out: statics.n_out,
                    in_rings: &statics.in_rings,
                    out_rings: &statics.out_rings,
                    in_offs: &local.job.in_offs,
                    in_lens: &local.job.in_lens,
                    in_flush: &local.job.in_flush,
                    advance: &mut local.job.advance,
                    out_offs: &local.job.out_offs,
                    out_lens: &mut local.job.out_lens,
                    max_writes: &statics.max_writes,
                    promises: &statics.promises,
                };
                context::with_owner(statics.owner.clone(), || statics.module.input(&mut ctx))
            };

            // Controllers observe every call, outside the lock.
            if !statics.hooks.is_empty() {
                let report = PostInputReport {
                    filter_name: &statics.name,
                    lens_in: &local.job.advance,
                    lens_out: &local.job.out_lens,
                    flushing: &local.job.in_flush,
                    n_in: statics.n_in,
                    n_out: statics.n_out,
                };
                for hook in &statics.hooks {
                    if (hook.cb)(&report) != 0 {
                        hook.retire.store(true, Ordering::Relaxed);
                    }
                }
            }

            let mut guard = core.sched.lock();
            if !reconcile(&core, &mut guard, fi, &mut local, ret) {
                break guard;
            }
            drop(guard);
        };

        // Return the argument record to the pool.
        *g.filters[fi].pool.job_mut(ji) = local.job;
        g.filters[fi].pool.working_to_unused(ji);
    }

    // Shutdown: no work and everyone else is idle.
    g.num_threads -= 1;
    if g.num_threads > 0 && g.num_idle == g.num_threads {
        core.jobs_cond.notify_all();
    }
    if g.num_threads == 0 && g.master_waiting {
        core.master_cond.notify_all();
    }
    g.num_workers -= 1;
    debug!("worker thread exiting");
}

impl Sched {
    /// Dot-detail introspection while a flow is live.
    pub(crate) fn filters(&self) -> &[RunFilter] {
        &self.filters
    }
}
