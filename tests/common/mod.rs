//! Common test utilities: instrumented plugin nodes and graph helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use frameflow_rs::pipeline::{
    BatchJob, BatchWork, ConfigValue, Dispatch, JobControl, KindSet, NodeContext, NodePlugin,
    PipelineError, PipelineResult, PortDescriptor, PortKind,
};
use frameflow_rs::Frame;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

// ==================== Counting source ====================

static SOURCE_PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", PortKind::Dataset)];

/// Source root whose frame `i` is a 2×2 frame filled with `i`. Counts every
/// `produce_frame` call.
pub struct CountingSource {
    frames: usize,
    calls: Arc<AtomicUsize>,
    cached: bool,
}

impl CountingSource {
    pub fn new(frames: usize) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = Self {
            frames,
            calls: calls.clone(),
            cached: false,
        };
        (node, calls)
    }

    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }
}

impl NodePlugin for CountingSource {
    fn type_name(&self) -> &str {
        "CountingSource"
    }

    fn ports(&self) -> &[PortDescriptor] {
        SOURCE_PORTS
    }

    fn is_source(&self) -> bool {
        true
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.frames)
    }

    fn caches_frames(&self) -> bool {
        self.cached
    }

    fn produce_frame(&mut self, _ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if index >= self.frames {
            return Ok(None);
        }
        Ok(Frame::from_pixels(index, 2, 2, vec![index as f32; 4]))
    }
}

// ==================== Failing node ====================

static PASS_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Dataset),
    PortDescriptor::output("out", PortKind::Dataset),
];

/// Fails every production with a node error.
pub struct FailingNode;

impl NodePlugin for FailingNode {
    fn type_name(&self) -> &str {
        "FailingNode"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PASS_PORTS
    }

    fn produce_frame(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        Err(PipelineError::node(
            ctx.node_id(),
            format!("cannot produce frame {}", index),
        ))
    }
}

/// Pulls the same index through its own input; wired into a loop it re-enters
/// itself.
pub struct PassThrough;

impl NodePlugin for PassThrough {
    fn type_name(&self) -> &str {
        "PassThrough"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PASS_PORTS
    }

    fn produce_frame(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        Ok(ctx.pull_frame("in", index))
    }
}

// ==================== Port probe ====================

const INPUT_NAMES: [&str; 4] = ["in0", "in1", "in2", "in3"];
const OUTPUT_NAMES: [&str; 4] = ["out0", "out1", "out2", "out3"];

/// A node with caller-chosen ports and no behaviour.
pub struct PortProbe {
    ports: Vec<PortDescriptor>,
}

impl PortProbe {
    /// `inputs` and `outputs` are `(kind, accepted partner kinds)`; at most
    /// four of each.
    pub fn new(inputs: &[(PortKind, &[PortKind])], outputs: &[(PortKind, &[PortKind])]) -> Self {
        let mut ports = describe(&INPUT_NAMES, inputs, false);
        ports.extend(describe(&OUTPUT_NAMES, outputs, true));
        Self { ports }
    }
}

fn describe(
    names: &[&'static str; 4],
    specs: &[(PortKind, &[PortKind])],
    output: bool,
) -> Vec<PortDescriptor> {
    specs
        .iter()
        .zip(names.iter())
        .map(|(&(kind, accepts), &name)| {
            let desc = if output {
                PortDescriptor::output(name, kind)
            } else {
                PortDescriptor::input(name, kind)
            };
            let set = accepts
                .iter()
                .fold(KindSet::single(kind), |set, &k| set.with(k));
            desc.accepting(set)
        })
        .collect()
}

impl NodePlugin for PortProbe {
    fn type_name(&self) -> &str {
        "PortProbe"
    }

    fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }
}

// ==================== Job probe ====================

/// Shared observations from a [`JobProbe`].
#[derive(Clone, Default)]
pub struct JobRecord {
    /// Indices accepted, in acceptance order
    pub accepted: Arc<Mutex<Vec<usize>>>,
    /// Indices handed to the per-item function
    pub processed: Arc<Mutex<Vec<usize>>>,
    /// Highest number of items in the per-item function at once
    pub peak_in_flight: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

impl JobRecord {
    pub fn accepted(&self) -> Vec<usize> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn processed(&self) -> Vec<usize> {
        let mut seen = self.processed.lock().unwrap().clone();
        seen.sort_unstable();
        seen
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct ProbeWork {
    fail_at: Option<usize>,
    panic_at: Option<usize>,
    fail_on_complete: bool,
    delay: Duration,
    record: JobRecord,
}

impl BatchWork for ProbeWork {
    type Item = usize;
    type Output = usize;

    fn gather(&mut self, _ctx: &mut NodeContext, index: usize) -> PipelineResult<usize> {
        Ok(index)
    }

    fn process(&self, index: usize) -> PipelineResult<usize> {
        if self.panic_at == Some(index) {
            panic!("item {} blew up", index);
        }
        let now = self.record.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.record.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.record.processed.lock().unwrap().push(index);
        self.record.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_at == Some(index) {
            return Err(PipelineError::invalid_param("item", format!("item {} is poisoned", index)));
        }
        Ok(index)
    }

    fn accept(&mut self, _ctx: &mut NodeContext, _index: usize, output: usize) -> PipelineResult<()> {
        self.record.accepted.lock().unwrap().push(output);
        Ok(())
    }

    fn complete(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        if self.fail_on_complete {
            return Err(PipelineError::MissingInput("completion refused".to_string()));
        }
        Ok(())
    }
}

/// Hosts a batch job over `0..items` with configurable failures.
/// `"start"`, `"cancel"` and `"acknowledge"` control it.
pub struct JobProbe {
    items: usize,
    job: BatchJob,
    work: ProbeWork,
}

impl JobProbe {
    pub fn new(items: usize, dispatch: Dispatch) -> (Self, JobRecord) {
        let record = JobRecord::default();
        let node = Self {
            items,
            job: BatchJob::new(dispatch),
            work: ProbeWork {
                fail_at: None,
                panic_at: None,
                fail_on_complete: false,
                delay: Duration::ZERO,
                record: record.clone(),
            },
        };
        (node, record)
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.work.fail_at = Some(index);
        self
    }

    /// Panic inside the per-item function for `index`.
    pub fn panicking_at(mut self, index: usize) -> Self {
        self.work.panic_at = Some(index);
        self
    }

    pub fn failing_on_complete(mut self) -> Self {
        self.work.fail_on_complete = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.work.delay = delay;
        self
    }
}

impl NodePlugin for JobProbe {
    fn type_name(&self) -> &str {
        "JobProbe"
    }

    fn ports(&self) -> &[PortDescriptor] {
        &[]
    }

    fn on_tick(&mut self, ctx: &mut NodeContext) {
        self.job.tick(&mut self.work, ctx);
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        match JobControl::parse(key) {
            Some(JobControl::Start) => {
                self.job.start(0..self.items)?;
                self.job.complete_if_empty(&mut self.work, ctx);
                Ok(())
            }
            Some(JobControl::Cancel) => {
                self.job.cancel_with(ctx);
                Ok(())
            }
            Some(JobControl::Acknowledge) => {
                self.job.acknowledge();
                Ok(())
            }
            None if key == "items" => {
                self.items = value
                    .as_usize()
                    .ok_or_else(|| PipelineError::invalid_param(key, "expected a count"))?;
                Ok(())
            }
            None => Err(PipelineError::invalid_param(key, "unknown parameter")),
        }
    }

    fn job(&self) -> Option<&BatchJob> {
        Some(&self.job)
    }
}

// ==================== Panicking tick ====================

/// Panics on every tick.
pub struct PanicOnTick;

impl NodePlugin for PanicOnTick {
    fn type_name(&self) -> &str {
        "PanicOnTick"
    }

    fn ports(&self) -> &[PortDescriptor] {
        &[]
    }

    fn on_tick(&mut self, _ctx: &mut NodeContext) {
        panic!("tick went wrong");
    }
}
