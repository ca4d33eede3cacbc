//! ParticleFit node: localizes point emitters in every frame.
//!
//! Detection is a local-maximum search above `threshold` (relative to the
//! frame mean), refined by an intensity-weighted centroid over the 3×3
//! neighbourhood. Frames are fitted on the worker pool a slice per tick; the
//! finished [`ParticleSet`] is published when the job completes.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::job::{resolve_extent, BatchJob, BatchWork, IndexRange, JobControl};
use crate::pipeline::node::{NodeContext, NodePlugin};
use crate::pipeline::nodes::{decode_params, encode_params, param_f64, param_usize};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::types::{Frame, ParticleRecord, ParticleSet};
use serde::{Deserialize, Serialize};
use tracing::info;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Dataset),
    PortDescriptor::output("out", PortKind::Coordinates).labelled("Particles"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Minimum height above the frame mean for a maximum to count
    pub threshold: f32,
    pub range: Option<IndexRange>,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            threshold: 200.0,
            range: None,
        }
    }
}

/// Find and refine local maxima in one frame.
pub fn detect(frame: &Frame, index: usize, threshold: f32) -> Vec<ParticleRecord> {
    let mut found = Vec::new();
    if frame.width < 3 || frame.height < 3 {
        return found;
    }
    let background = frame.stats().mean().unwrap_or(0.0) as f32;

    for y in 1..frame.height - 1 {
        for x in 1..frame.width - 1 {
            let Some(v) = frame.get(x, y) else {
                continue;
            };
            if v - background < threshold || !is_local_max(frame, x, y, v) {
                continue;
            }
            found.push(centroid(frame, index, x, y, background));
        }
    }
    found
}

/// Strictly greater than earlier neighbours in scan order and not below
/// later ones, so a flat plateau yields a single maximum.
fn is_local_max(frame: &Frame, x: usize, y: usize, v: f32) -> bool {
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = (x as i64 + dx) as usize;
            let ny = (y as i64 + dy) as usize;
            let Some(n) = frame.get(nx, ny) else {
                continue;
            };
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if n > v || (earlier && n == v) {
                return false;
            }
        }
    }
    true
}

fn centroid(frame: &Frame, index: usize, x: usize, y: usize, background: f32) -> ParticleRecord {
    let mut samples = [(0.0f64, 0.0f64, 0.0f64); 9];
    let mut total = 0.0f64;
    let mut sx = 0.0f64;
    let mut sy = 0.0f64;
    for (i, (dx, dy)) in (-1i64..=1)
        .flat_map(|dy| (-1i64..=1).map(move |dx| (dx, dy)))
        .enumerate()
    {
        let px = (x as i64 + dx) as f64;
        let py = (y as i64 + dy) as f64;
        let w = frame
            .get(px as usize, py as usize)
            .map_or(0.0, |v| (v - background).max(0.0) as f64);
        samples[i] = (px, py, w);
        total += w;
        sx += w * px;
        sy += w * py;
    }
    let (cx, cy) = if total > 0.0 {
        (sx / total, sy / total)
    } else {
        (x as f64, y as f64)
    };
    let spread = if total > 0.0 {
        samples
            .iter()
            .map(|(px, py, w)| w * ((px - cx).powi(2) + (py - cy).powi(2)))
            .sum::<f64>()
            / total
    } else {
        0.0
    };
    ParticleRecord {
        frame: index,
        x: cx,
        y: cy,
        intensity: total,
        sigma: spread.sqrt(),
    }
}

struct FitOutput {
    width: usize,
    height: usize,
    particles: Vec<ParticleRecord>,
}

#[derive(Default)]
struct FitWork {
    threshold: f32,
    staging: Option<ParticleSet>,
    result: Option<ParticleSet>,
}

impl BatchWork for FitWork {
    type Item = (usize, Frame);
    type Output = FitOutput;

    fn gather(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<(usize, Frame)> {
        ctx.pull_frame("in", index)
            .map(|frame| (index, frame))
            .ok_or_else(|| PipelineError::MissingInput(format!("frame {} to fit", index)))
    }

    fn process(&self, (index, frame): (usize, Frame)) -> PipelineResult<FitOutput> {
        Ok(FitOutput {
            width: frame.width,
            height: frame.height,
            particles: detect(&frame, index, self.threshold),
        })
    }

    fn accept(&mut self, _ctx: &mut NodeContext, _index: usize, output: FitOutput) -> PipelineResult<()> {
        let set = self
            .staging
            .get_or_insert_with(|| ParticleSet::new(output.width, output.height));
        set.frame_count += 1;
        set.particles.extend(output.particles);
        Ok(())
    }

    fn complete(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        let mut set = self.staging.take().unwrap_or_default();
        set.sort();
        info!(
            "Fitted {} particles in {} frames on {}",
            set.len(),
            set.frame_count,
            ctx.node_id()
        );
        self.result = Some(set);
        ctx.mark_output_changed();
        Ok(())
    }
}

pub struct ParticleFitNode {
    params: FitParams,
    job: BatchJob,
    work: FitWork,
}

impl ParticleFitNode {
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
            job: BatchJob::parallel(),
            work: FitWork::default(),
        }
    }

    pub fn particles(&self) -> Option<&ParticleSet> {
        self.work.result.as_ref()
    }

    fn control(&mut self, control: JobControl, ctx: &mut NodeContext) -> PipelineResult<()> {
        match control {
            JobControl::Start => {
                let extent = resolve_extent(ctx, "in", self.params.range)?;
                self.job.start(extent.clone())?;
                self.work.threshold = self.params.threshold;
                self.work.staging = None;
                if self.work.result.take().is_some() {
                    ctx.mark_output_changed();
                }
                info!("Fitting frames {:?} on {}", extent, ctx.node_id());
                self.job.complete_if_empty(&mut self.work, ctx);
            }
            JobControl::Cancel => {
                if self.job.cancel_with(ctx) {
                    self.work.staging = None;
                }
            }
            JobControl::Acknowledge => self.job.acknowledge(),
        }
        Ok(())
    }
}

impl Default for ParticleFitNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for ParticleFitNode {
    fn type_name(&self) -> &str {
        "ParticleFit"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn produce_particles(&mut self, _ctx: &mut NodeContext) -> PipelineResult<Option<ParticleSet>> {
        Ok(self.work.result.clone())
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
            "threshold" => self.params.threshold = param_f64(key, value)? as f32,
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

    fn spot(width: usize, height: usize, at: &[(usize, usize)]) -> Frame {
        let mut frame = Frame::zeros(0, width, height);
        for &(x, y) in at {
            *frame.get_mut(x, y).unwrap() = 1000.0;
            for (nx, ny) in [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)] {
                *frame.get_mut(nx, ny).unwrap() += 250.0;
            }
        }
        frame
    }

    #[test]
    fn test_detects_symmetric_spot_at_centre() {
        let frame = spot(12, 12, &[(5, 6)]);
        let found = detect(&frame, 4, 200.0);
        assert_eq!(found.len(), 1);
        let p = found[0];
        assert_eq!(p.frame, 4);
        assert!((p.x - 5.0).abs() < 1e-9);
        assert!((p.y - 6.0).abs() < 1e-9);
        assert!(p.intensity > 0.0);
        assert!(p.sigma > 0.0);
    }

    #[test]
    fn test_separate_spots() {
        let frame = spot(20, 10, &[(3, 3), (15, 6)]);
        assert_eq!(detect(&frame, 0, 200.0).len(), 2);
    }

    #[test]
    fn test_plateau_yields_single_maximum() {
        let mut frame = Frame::zeros(0, 8, 8);
        *frame.get_mut(3, 3).unwrap() = 900.0;
        *frame.get_mut(4, 3).unwrap() = 900.0;
        assert_eq!(detect(&frame, 0, 100.0).len(), 1);
    }

    #[test]
    fn test_below_threshold_and_tiny_frames() {
        let frame = spot(12, 12, &[(5, 5)]);
        assert!(detect(&frame, 0, 5000.0).is_empty());
        assert!(detect(&Frame::zeros(0, 2, 2), 0, 0.0).is_empty());
    }
}
