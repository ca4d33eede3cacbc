//! Cooperative, tick-driven batch jobs.
//!
//! A [`BatchJob`] is embedded in any node that performs long-running work.
//! Each host-loop tick draws at most `batch_size` item indices from the work
//! queue, gathers their inputs on the host thread, runs the per-item function
//! (serially or as one worker-pool batch), and accepts the outputs. The only
//! blocking wait is the current slice, so the host loop stays responsive no
//! matter how large the job is.
//!
//! ```text
//! Idle ──start──► Running ──queue empty──► Completed
//!                    │  └──────error──────► Failed
//!                    └──────cancel──────► Cancelled
//! ```
//!
//! An empty extent completes as soon as the node calls
//! [`BatchJob::complete_if_empty`] after `start`. Terminal states stay
//! observable until the next `start` or `acknowledge`.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::events::GraphEvent;
use crate::pipeline::node::NodeContext;
use crate::pipeline::worker_pool::call_guarded;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_running(self) -> bool {
        self == JobState::Running
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    pub fn display_name(self) -> &'static str {
        match self {
            JobState::Idle => "Idle",
            JobState::Running => "Running",
            JobState::Completed => "Completed",
            JobState::Cancelled => "Cancelled",
            JobState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Progress pair for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub state: JobState,
    pub done: usize,
    pub total: usize,
}

impl JobProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            if self.state == JobState::Completed {
                1.0
            } else {
                0.0
            }
        } else {
            self.done as f32 / self.total as f32
        }
    }
}

/// How a slice's per-item work is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// On the host thread, in index order, stopping at the first error.
    Serial,
    /// As a single `WorkerPool::run_batch` call.
    Parallel,
}

/// Optional explicit extent for a job, `start..end` (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end.max(self.start)
    }
}

/// Resolve the items a job should cover: the explicit range if one is set,
/// otherwise every frame of the root source behind `input`.
pub fn resolve_extent(
    ctx: &NodeContext,
    input: &str,
    range: Option<IndexRange>,
) -> PipelineResult<Range<usize>> {
    match range {
        Some(r) => Ok(r.as_range()),
        None => ctx
            .source_frame_count(input)
            .map(|n| 0..n)
            .ok_or(PipelineError::NoUpstreamSource),
    }
}

/// Control keys understood by every job-hosting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
    Start,
    Cancel,
    Acknowledge,
}

impl JobControl {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "start" => Some(JobControl::Start),
            "cancel" => Some(JobControl::Cancel),
            "acknowledge" => Some(JobControl::Acknowledge),
            _ => None,
        }
    }
}

/// Per-item work plugged into a [`BatchJob`].
///
/// `gather` and `accept` run on the host thread and may pull through the
/// context. `process` is the pure part and may run on a worker thread.
pub trait BatchWork {
    type Item: Send;
    type Output: Send;

    fn gather(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Self::Item>;

    fn process(&self, item: Self::Item) -> PipelineResult<Self::Output>;

    fn accept(
        &mut self,
        ctx: &mut NodeContext,
        index: usize,
        output: Self::Output,
    ) -> PipelineResult<()>;

    /// Runs once after the last item has been accepted.
    fn complete(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Remaining indices; `pop` yields the next one.
    queue: Vec<usize>,
    total: usize,
    done: usize,
    state: JobState,
    dispatch: Dispatch,
    last_dispatched: usize,
}

impl BatchJob {
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            queue: Vec::new(),
            total: 0,
            done: 0,
            state: JobState::Idle,
            dispatch,
            last_dispatched: 0,
        }
    }

    pub fn serial() -> Self {
        Self::new(Dispatch::Serial)
    }

    pub fn parallel() -> Self {
        Self::new(Dispatch::Parallel)
    }

    /// Fill the queue and enter `Running`. A terminal state is left behind.
    pub fn start(&mut self, items: impl IntoIterator<Item = usize>) -> PipelineResult<()> {
        if self.state == JobState::Running {
            return Err(PipelineError::JobAlreadyRunning);
        }
        let mut queue: Vec<usize> = items.into_iter().collect();
        queue.reverse();
        self.total = queue.len();
        self.done = 0;
        self.queue = queue;
        self.state = JobState::Running;
        self.last_dispatched = 0;
        Ok(())
    }

    /// Stop scheduling further slices. Returns `false` (and does nothing)
    /// unless the job was running.
    pub fn cancel(&mut self) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.queue.clear();
        self.state = JobState::Cancelled;
        true
    }

    /// [`cancel`](Self::cancel), logging and notifying subscribers.
    pub fn cancel_with(&mut self, ctx: &mut NodeContext) -> bool {
        if !self.cancel() {
            return false;
        }
        info!(
            "{} job on {} cancelled at {}/{}",
            ctx.node_label(),
            ctx.node_id(),
            self.done,
            self.total
        );
        ctx.emit(GraphEvent::JobFinished {
            node: ctx.node_id(),
            state: JobState::Cancelled,
        });
        true
    }

    /// Return a finished job to `Idle`.
    pub fn acknowledge(&mut self) {
        if self.state.is_terminal() {
            self.state = JobState::Idle;
            self.total = 0;
            self.done = 0;
            self.last_dispatched = 0;
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Items handed to the per-item function during the most recent tick.
    pub fn last_dispatched(&self) -> usize {
        self.last_dispatched
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            state: self.state,
            done: self.done,
            total: self.total,
        }
    }

    /// Advance the job by one slice. Does nothing unless running.
    pub fn tick<W>(&mut self, work: &mut W, ctx: &mut NodeContext) -> JobState
    where
        W: BatchWork + Sync,
    {
        self.last_dispatched = 0;
        if self.state != JobState::Running {
            return self.state;
        }

        let width = ctx.batch_size().max(1);
        let mut slice = Vec::with_capacity(width.min(self.queue.len()));
        while slice.len() < width {
            match self.queue.pop() {
                Some(index) => slice.push(index),
                None => break,
            }
        }

        let mut gathered = Vec::with_capacity(slice.len());
        for index in slice {
            match work.gather(ctx, index) {
                Ok(item) => gathered.push((index, item)),
                Err(err) => return self.fail(ctx, Some(index), err),
            }
        }

        match self.dispatch {
            Dispatch::Serial => {
                for (index, item) in gathered {
                    self.last_dispatched += 1;
                    let processed = {
                        let worker: &W = work;
                        call_guarded(&|item: W::Item| worker.process(item), item)
                    };
                    let outcome = processed.and_then(|output| work.accept(ctx, index, output));
                    if let Err(err) = outcome {
                        return self.fail(ctx, Some(index), err);
                    }
                    self.done += 1;
                }
            }
            Dispatch::Parallel => {
                let pool = ctx.pool();
                let (indices, items): (Vec<usize>, Vec<W::Item>) = gathered.into_iter().unzip();
                self.last_dispatched = items.len();
                let results = {
                    let worker: &W = work;
                    pool.run_batch(items, |item| worker.process(item))
                };
                for (index, result) in indices.into_iter().zip(results) {
                    if let Err(err) = result.and_then(|output| work.accept(ctx, index, output)) {
                        return self.fail(ctx, Some(index), err);
                    }
                    self.done += 1;
                }
            }
        }

        debug!(
            "Job on {} progressed to {}/{}",
            ctx.node_id(),
            self.done,
            self.total
        );

        if self.queue.is_empty() {
            return self.finish(work, ctx);
        }
        self.state
    }

    /// Complete a running job whose queue is already empty. Nodes call this
    /// right after `start`, so an empty extent is `Completed` before anyone
    /// can observe `done == total` on a running job.
    pub fn complete_if_empty<W: BatchWork>(&mut self, work: &mut W, ctx: &mut NodeContext) -> JobState {
        if self.state == JobState::Running && self.queue.is_empty() {
            return self.finish(work, ctx);
        }
        self.state
    }

    fn finish<W: BatchWork>(&mut self, work: &mut W, ctx: &mut NodeContext) -> JobState {
        if let Err(err) = work.complete(ctx) {
            return self.fail(ctx, None, err);
        }
        self.state = JobState::Completed;
        info!(
            "{} job on {} completed ({} items)",
            ctx.node_label(),
            ctx.node_id(),
            self.done
        );
        ctx.emit(GraphEvent::JobFinished {
            node: ctx.node_id(),
            state: JobState::Completed,
        });
        self.state
    }

    fn fail(&mut self, ctx: &mut NodeContext, index: Option<usize>, err: PipelineError) -> JobState {
        self.queue.clear();
        self.state = JobState::Failed;
        let context = match index {
            Some(i) => format!("{} job on {} failed at item {}", ctx.node_label(), ctx.node_id(), i),
            None => format!("{} job on {} failed to complete", ctx.node_label(), ctx.node_id()),
        };
        ctx.report_error(&err, context);
        ctx.emit(GraphEvent::JobFinished {
            node: ctx.node_id(),
            state: JobState::Failed,
        });
        JobState::Failed
    }
}

impl Default for BatchJob {
    fn default() -> Self {
        Self::serial()
    }
}
