//! Job records and the per-filter job lists
//!
//! Jobs are how threads flow through the graph: a job is a pre-allocated
//! argument record for one `input()` invocation. Each filter owns a
//! small pool of them moving through four stations:
//!
//! - the **unused** stack of jobs waiting for work,
//! - the single **staged** slot being filled with cursor snapshots,
//! - the stream-wide FIFO queue of jobs ready for any worker
//!   (owned by the scheduler, not by this type), and
//! - the **working** list of jobs currently inside `input()`.
//!
//! The stage and the unused stack act as one list with a distinguished
//! head: enqueueing a filter pushes the staged job to the stream queue
//! and immediately refills the stage from the unused stack. The pool
//! therefore holds one record more than the filter's maximum number of
//! concurrently working threads.
//!
//! All transfers happen under the stream mutex.

/// Argument record for one `input()` call.
///
/// Input cursors are snapshotted in at dispatch; `advance` and
/// `out_lens` are written back by the filter through its input context
/// and reconciled after the call returns.
#[derive(Default)]
pub(crate) struct Job {
    /// Per input port: read cursor offset at dispatch.
    pub in_offs: Vec<usize>,
    /// Per input port: readable bytes at dispatch.
    pub in_lens: Vec<usize>,
    /// Per input port: the feeder is finished; these are final bytes.
    pub in_flush: Vec<bool>,
    /// Per input port: bytes the filter consumed.
    pub advance: Vec<usize>,
    /// Per output port: write cursor offset at dispatch.
    pub out_offs: Vec<usize>,
    /// Per output port: bytes the filter produced.
    pub out_lens: Vec<usize>,
}

impl Job {
    fn new(n_in: usize, n_out: usize) -> Self {
        Self {
            in_offs: vec![0; n_in],
            in_lens: vec![0; n_in],
            in_flush: vec![false; n_in],
            advance: vec![0; n_in],
            out_offs: vec![0; n_out],
            out_lens: vec![0; n_out],
        }
    }

    pub fn clear(&mut self, n_in: usize, n_out: usize) {
        self.in_offs.clear();
        self.in_offs.resize(n_in, 0);
        self.in_lens.clear();
        self.in_lens.resize(n_in, 0);
        self.in_flush.clear();
        self.in_flush.resize(n_in, false);
        self.advance.clear();
        self.advance.resize(n_in, 0);
        self.out_offs.clear();
        self.out_offs.resize(n_out, 0);
        self.out_lens.clear();
        self.out_lens.resize(n_out, 0);
    }
}

pub(crate) struct JobPool {
    jobs: Vec<Job>,
    /// Stack of job indices waiting for work.
    unused: Vec<usize>,
    /// The one job being staged for the stream queue.
    stage: usize,
    /// Jobs currently inside `input()`.
    working: Vec<usize>,
    n_in: usize,
    n_out: usize,
}

impl JobPool {
    /// `max_working` is the most threads that may run this filter's
    /// `input()` at once; the pool allocates one extra record for the
    /// stage slot.
    pub fn new(max_working: u32, n_in: usize, n_out: usize) -> Self {
        let count = max_working.max(1) as usize + 1;
        let jobs = (0..count).map(|_| Job::new(n_in, n_out)).collect();
        Self {
            jobs,
            // Job 0 starts staged; the rest start unused.
            unused: (1..count).rev().collect(),
            stage: 0,
            working: Vec::with_capacity(count),
            n_in,
            n_out,
        }
    }

    /// A fresh stage replacement is available, so the filter may be
    /// enqueued again.
    pub fn has_spare(&self) -> bool {
        !self.unused.is_empty()
    }

    pub fn num_working(&self) -> usize {
        self.working.len()
    }

    /// Stage → stream queue: hand the staged job index to the caller
    /// (who pushes it on the queue) and refill the stage from the
    /// unused stack, clearing its arguments.
    pub fn stage_to_queue(&mut self) -> usize {
        let staged = self.stage;
        let fresh = self
            .unused
            .pop()
            .expect("enqueue requires a spare job; checked by eligibility");
        self.jobs[fresh].clear(self.n_in, self.n_out);
        self.stage = fresh;
        staged
    }

    /// Stream queue → working: the job was dequeued by a worker.
    pub fn queue_to_working(&mut self, job: usize) {
        debug_assert!(!self.working.contains(&job));
        self.working.push(job);
    }

    /// Working → unused: the job's `input()` call chain is done.
    pub fn working_to_unused(&mut self, job: usize) {
        let pos = self
            .working
            .iter()
            .position(|&j| j == job)
            .expect("job must be in the working list");
        self.working.swap_remove(pos);
        self.unused.push(job);
    }

    /// A queued job was withdrawn without running (its filter
    /// finished).
    pub fn queue_to_unused(&mut self, job: usize) {
        self.unused.push(job);
    }

    pub fn job_mut(&mut self, job: usize) -> &mut Job {
        &mut self.jobs[job]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_with_one_staged() {
        let pool = JobPool::new(1, 2, 1);
        // max_working=1 ⇒ two records: one staged, one unused.
        assert!(pool.has_spare());
        assert_eq!(pool.num_working(), 0);
    }

    #[test]
    fn test_stage_queue_working_roundtrip() {
        let mut pool = JobPool::new(1, 1, 1);

        let j = pool.stage_to_queue();
        // The stage was refilled from the only unused record.
        assert!(!pool.has_spare());

        pool.queue_to_working(j);
        assert_eq!(pool.num_working(), 1);

        pool.working_to_unused(j);
        assert_eq!(pool.num_working(), 0);
        assert!(pool.has_spare());
    }

    #[test]
    fn test_stage_refill_clears_args() {
        let mut pool = JobPool::new(1, 2, 2);
        let j = pool.stage_to_queue();
        pool.job_mut(j).in_lens[1] = 77;
        pool.job_mut(j).out_lens[0] = 5;
        pool.queue_to_working(j);
        pool.working_to_unused(j);

        // Re-stage the dirty record; its args must come back clean.
        let j2 = pool.stage_to_queue();
        assert_eq!(j2, j);
        assert_eq!(pool.job_mut(j2).in_lens, vec![0, 0]);
        assert_eq!(pool.job_mut(j2).out_lens, vec![0, 0]);
    }

    #[test]
    #[should_panic(expected = "spare job")]
    fn test_enqueue_without_spare_panics() {
        let mut pool = JobPool::new(1, 0, 1);
        let _ = pool.stage_to_queue();
        let _ = pool.stage_to_queue();
    }
}
