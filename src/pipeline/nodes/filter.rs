//! FrameFilter node: per-frame arithmetic with optional temporal smoothing.
//!
//! Output pixel = `(mean of frames index-r..=index+r) * gain + offset`, then
//! values below `threshold` (when set) are zeroed. With `temporal_radius = 0`
//! only the requested frame is pulled. Missing neighbours at the ends of the
//! stack are skipped; a missing centre frame yields no data. The window never
//! reaches past the source's last frame, and the radius is capped at
//! [`MAX_TEMPORAL_RADIUS`].

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{NodeContext, NodePlugin};
use crate::pipeline::nodes::{decode_params, encode_params, param_f64, param_usize};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::types::Frame;
use serde::{Deserialize, Serialize};

/// Largest accepted `temporal_radius`.
pub const MAX_TEMPORAL_RADIUS: usize = 256;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Dataset),
    PortDescriptor::output("out", PortKind::Dataset),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub gain: f32,
    pub offset: f32,
    /// Values below this are set to zero. `None` disables thresholding.
    pub threshold: Option<f32>,
    pub temporal_radius: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
            threshold: None,
            temporal_radius: 0,
        }
    }
}

impl FilterParams {
    pub fn is_passthrough(&self) -> bool {
        self.gain == 1.0 && self.offset == 0.0 && self.threshold.is_none() && self.temporal_radius == 0
    }

    fn apply(&self, frame: &mut Frame) {
        for px in frame.pixels.iter_mut() {
            let v = *px * self.gain + self.offset;
            *px = match self.threshold {
                Some(t) if v < t => 0.0,
                _ => v,
            };
        }
    }
}

pub struct FrameFilterNode {
    params: FilterParams,
}

impl FrameFilterNode {
    pub fn new() -> Self {
        Self {
            params: FilterParams::default(),
        }
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    fn temporal_mean(&self, ctx: &mut NodeContext, index: usize) -> Option<Frame> {
        let mut centre = ctx.pull_frame("in", index)?;
        let r = self.params.temporal_radius;
        if r == 0 {
            return Some(centre);
        }

        let mut last = index.saturating_add(r);
        if let Some(frames) = ctx.source_frame_count("in") {
            last = last.min(frames.saturating_sub(1));
        }
        let mut count = 1.0f32;
        for i in index.saturating_sub(r)..=last {
            if i == index {
                continue;
            }
            let Some(neighbour) = ctx.pull_frame("in", i) else {
                continue;
            };
            if !neighbour.same_shape(&centre) {
                continue;
            }
            for (acc, v) in centre.pixels.iter_mut().zip(&neighbour.pixels) {
                *acc += *v;
            }
            count += 1.0;
        }
        for px in centre.pixels.iter_mut() {
            *px /= count;
        }
        Some(centre)
    }
}

impl Default for FrameFilterNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for FrameFilterNode {
    fn type_name(&self) -> &str {
        "FrameFilter"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn caches_frames(&self) -> bool {
        true
    }

    fn produce_frame(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        let Some(mut frame) = self.temporal_mean(ctx, index) else {
            return Ok(None);
        };
        frame.index = index;
        if !self.params.is_passthrough() {
            self.params.apply(&mut frame);
        }
        Ok(Some(frame))
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        match key {
            "gain" => self.params.gain = param_f64(key, value)? as f32,
            "offset" => self.params.offset = param_f64(key, value)? as f32,
            "threshold" => {
                // `false` turns thresholding off
                self.params.threshold = match value {
                    ConfigValue::Bool(false) => None,
                    other => Some(param_f64(key, other)? as f32),
                };
            }
            "temporal_radius" => {
                self.params.temporal_radius = check_radius(param_usize(key, value)?)?;
            }
            "clear" => self.params = FilterParams::default(),
            _ => return Err(PipelineError::invalid_param(key, "unknown parameter")),
        }
        Ok(())
    }

    fn save_params(&self) -> serde_json::Value {
        encode_params(&self.params)
    }

    fn load_params(&mut self, params: serde_json::Value) -> PipelineResult<()> {
        if let Some(params) = decode_params::<FilterParams>(params)? {
            check_radius(params.temporal_radius)?;
            self.params = params;
        }
        Ok(())
    }
}

fn check_radius(radius: usize) -> PipelineResult<usize> {
    if radius > MAX_TEMPORAL_RADIUS {
        return Err(PipelineError::invalid_param(
            "temporal_radius",
            format!("{} exceeds the maximum of {}", radius, MAX_TEMPORAL_RADIUS),
        ));
    }
    Ok(radius)
}
