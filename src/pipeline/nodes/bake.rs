//! BakeStack node: pre-bakes an upstream stack into memory.
//!
//! Until a bake has completed the node passes frames straight through from
//! its input. Starting a bake clears any previous result and copies the
//! requested extent a slice per tick; on completion the node serves the baked
//! frames and becomes a source root for downstream traversal.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::job::{resolve_extent, BatchJob, BatchWork, IndexRange, JobControl};
use crate::pipeline::node::{NodeContext, NodePlugin};
use crate::pipeline::nodes::{decode_params, encode_params, param_usize};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::types::Frame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Dataset),
    PortDescriptor::output("out", PortKind::Dataset).labelled("Baked"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeParams {
    /// Explicit extent; the whole upstream stack when unset.
    pub range: Option<IndexRange>,
}

#[derive(Default)]
struct BakeWork {
    staging: BTreeMap<usize, Frame>,
    baked: Option<BTreeMap<usize, Frame>>,
}

impl BatchWork for BakeWork {
    type Item = Frame;
    type Output = Frame;

    fn gather(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Frame> {
        ctx.pull_frame("in", index)
            .ok_or_else(|| PipelineError::MissingInput(format!("upstream frame {}", index)))
    }

    fn process(&self, frame: Frame) -> PipelineResult<Frame> {
        Ok(frame)
    }

    fn accept(&mut self, _ctx: &mut NodeContext, index: usize, frame: Frame) -> PipelineResult<()> {
        self.staging.insert(index, frame);
        Ok(())
    }

    fn complete(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.baked = Some(std::mem::take(&mut self.staging));
        ctx.mark_output_changed();
        Ok(())
    }
}

pub struct BakeStackNode {
    params: BakeParams,
    job: BatchJob,
    work: BakeWork,
}

impl BakeStackNode {
    pub fn new() -> Self {
        Self {
            params: BakeParams::default(),
            job: BatchJob::serial(),
            work: BakeWork::default(),
        }
    }

    pub fn is_baked(&self) -> bool {
        self.work.baked.is_some()
    }

    /// Number of frames held by the completed bake.
    pub fn baked_len(&self) -> usize {
        self.work.baked.as_ref().map_or(0, |frames| frames.len())
    }

    fn control(&mut self, control: JobControl, ctx: &mut NodeContext) -> PipelineResult<()> {
        match control {
            JobControl::Start => {
                let extent = resolve_extent(ctx, "in", self.params.range)?;
                self.job.start(extent.clone())?;
                self.work.staging.clear();
                if self.work.baked.take().is_some() {
                    ctx.mark_output_changed();
                }
                info!("Baking frames {:?} on {}", extent, ctx.node_id());
                self.job.complete_if_empty(&mut self.work, ctx);
            }
            JobControl::Cancel => {
                if self.job.cancel_with(ctx) {
                    self.work.staging.clear();
                }
            }
            JobControl::Acknowledge => self.job.acknowledge(),
        }
        Ok(())
    }
}

impl Default for BakeStackNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for BakeStackNode {
    fn type_name(&self) -> &str {
        "BakeStack"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn is_source(&self) -> bool {
        self.is_baked()
    }

    fn frame_count(&self) -> Option<usize> {
        self.work
            .baked
            .as_ref()
            .map(|frames| frames.keys().next_back().map_or(0, |last| last + 1))
    }

    fn produce_frame(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        match &self.work.baked {
            Some(frames) => Ok(frames.get(&index).cloned()),
            None => Ok(ctx.pull_frame("in", index)),
        }
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
        if let Some(control) = JobControl::parse(key) {
            return self.control(control, ctx);
        }
        match key {
            "range_start" | "range_end" => {
                let n = param_usize(key, value)?;
                let mut range = self.params.range.unwrap_or(IndexRange { start: 0, end: 0 });
                if key == "range_start" {
                    range.start = n;
                } else {
                    range.end = n;
                }
                self.params.range = Some(range);
            }
            "full_range" => self.params.range = None,
            _ => return Err(PipelineError::invalid_param(key, "unknown parameter")),
        }
        Ok(())
    }

    fn save_params(&self) -> serde_json::Value {
        encode_params(&self.params)
    }

    fn load_params(&mut self, params: serde_json::Value) -> PipelineResult<()> {
        if let Some(params) = decode_params(params)? {
            self.params = params;
        }
        Ok(())
    }

    fn job(&self) -> Option<&BatchJob> {
        Some(&self.job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerSettings;
    use crate::pipeline::graph::Graph;
    use crate::pipeline::id::NodeId;
    use crate::pipeline::job::JobState;
    use crate::pipeline::node::NodeRef;

    fn stack_and_bake(frames: i64) -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new(SchedulerSettings {
            batch_size: 2,
            worker_count: 2,
        });
        let src = graph.create_node("SyntheticStack").unwrap();
        graph
            .configure(src, "frame_count", &ConfigValue::Int(frames))
            .unwrap();
        let bake = graph.create_node("BakeStack").unwrap();
        let out = graph.port_by_name(src, "out").unwrap();
        let input = graph.port_by_name(bake, "in").unwrap();
        graph.connect(out, input).unwrap();
        (graph, src, bake)
    }

    fn run(graph: &mut Graph, bake: NodeId) -> JobState {
        graph.start_job(bake).unwrap();
        while graph.has_running_jobs() {
            graph.tick_all();
        }
        graph.job_progress(bake).unwrap().state
    }

    #[test]
    fn test_passes_through_until_baked() {
        let (mut graph, src, bake) = stack_and_bake(4);
        assert!(!graph.node(bake).unwrap().is_source());
        assert_eq!(graph.frame_count(NodeRef::Node(bake)), None);
        assert_eq!(
            graph.produce_frame(NodeRef::Node(bake), 3),
            graph.produce_frame(NodeRef::Node(src), 3)
        );
    }

    #[test]
    fn test_range_bake_serves_only_its_frames() {
        let (mut graph, _, bake) = stack_and_bake(10);
        graph.configure(bake, "range_start", &ConfigValue::Int(2)).unwrap();
        graph.configure(bake, "range_end", &ConfigValue::Int(5)).unwrap();
        assert_eq!(run(&mut graph, bake), JobState::Completed);

        assert!(graph.node(bake).unwrap().is_source());
        assert_eq!(graph.frame_count(NodeRef::Node(bake)), Some(5));
        assert!(graph.produce_frame(NodeRef::Node(bake), 0).is_none());
        assert_eq!(graph.produce_frame(NodeRef::Node(bake), 4).unwrap().index, 4);
    }

    #[test]
    fn test_cancel_keeps_pass_through() {
        let (mut graph, _, bake) = stack_and_bake(10);
        graph.start_job(bake).unwrap();
        graph.tick_all();
        graph.cancel_job(bake).unwrap();
        graph.tick_all();

        let progress = graph.job_progress(bake).unwrap();
        assert_eq!(progress.state, JobState::Cancelled);
        assert_eq!(progress.done, 2);
        assert!(!graph.node(bake).unwrap().is_source());
        assert!(graph.produce_frame(NodeRef::Node(bake), 9).is_some());
    }
}
