//! SyntheticStack node: deterministic image stack generator.
//!
//! Produces frames of blinking Gaussian emitters over a flat background.
//! Every frame is a pure function of the parameters and the index, so the
//! stack behaves like a file on disk without any I/O.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{NodeContext, NodePlugin};
use crate::pipeline::nodes::{decode_params, encode_params, param_f64, param_positive, param_usize};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::types::Frame;
use serde::{Deserialize, Serialize};

static PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", PortKind::Dataset).labelled("Stack")];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackParams {
    pub width: usize,
    pub height: usize,
    pub frame_count: usize,
    pub emitters: usize,
    pub seed: u64,
    pub background: f32,
    pub peak: f32,
    /// Gaussian sigma in pixels
    pub sigma: f32,
    /// Chance that an emitter is on in a given frame
    pub on_probability: f64,
}

impl Default for StackParams {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            frame_count: 32,
            emitters: 12,
            seed: 1,
            background: 100.0,
            peak: 1000.0,
            sigma: 1.3,
            on_probability: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Emitter {
    x: f32,
    y: f32,
}

pub struct SyntheticStackNode {
    params: StackParams,
    emitters: Vec<Emitter>,
}

impl SyntheticStackNode {
    pub fn new() -> Self {
        Self::with_params(StackParams::default())
    }

    pub fn with_params(params: StackParams) -> Self {
        let emitters = place_emitters(&params);
        Self { params, emitters }
    }

    pub fn params(&self) -> &StackParams {
        &self.params
    }

    fn set_params(&mut self, params: StackParams) {
        self.emitters = place_emitters(&params);
        self.params = params;
    }

    /// Render frame `index`. `None` past the end of the stack.
    pub fn render(&self, index: usize) -> Option<Frame> {
        let p = &self.params;
        if index >= p.frame_count {
            return None;
        }
        let mut frame = Frame::zeros(index, p.width, p.height);
        frame.pixels.fill(p.background);

        let sigma = p.sigma.max(0.1);
        let reach = (4.0 * sigma).ceil() as i64;
        let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);
        for (e, emitter) in self.emitters.iter().enumerate() {
            if !is_on(p.seed, e, index, p.on_probability) {
                continue;
            }
            let cx = emitter.x.round() as i64;
            let cy = emitter.y.round() as i64;
            for y in (cy - reach).max(0)..(cy + reach + 1).min(p.height as i64) {
                for x in (cx - reach).max(0)..(cx + reach + 1).min(p.width as i64) {
                    let dx = x as f32 - emitter.x;
                    let dy = y as f32 - emitter.y;
                    let value = p.peak * (-(dx * dx + dy * dy) * inv_two_sigma_sq).exp();
                    if let Some(px) = frame.get_mut(x as usize, y as usize) {
                        *px += value;
                    }
                }
            }
        }
        Some(frame)
    }
}

impl Default for SyntheticStackNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for SyntheticStackNode {
    fn type_name(&self) -> &str {
        "SyntheticStack"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn is_source(&self) -> bool {
        true
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.params.frame_count)
    }

    fn produce_frame(&mut self, _ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        Ok(self.render(index))
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        let mut params = self.params.clone();
        match key {
            "width" => params.width = param_positive(key, value)?,
            "height" => params.height = param_positive(key, value)?,
            "frame_count" => params.frame_count = param_usize(key, value)?,
            "emitters" => params.emitters = param_usize(key, value)?,
            "seed" => params.seed = param_usize(key, value)? as u64,
            "background" => params.background = param_f64(key, value)? as f32,
            "peak" => params.peak = param_f64(key, value)? as f32,
            "sigma" => params.sigma = param_f64(key, value)? as f32,
            "on_probability" => {
                let p = param_f64(key, value)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(PipelineError::invalid_param(key, "must be within 0..=1"));
                }
                params.on_probability = p;
            }
            _ => return Err(PipelineError::invalid_param(key, "unknown parameter")),
        }
        self.set_params(params);
        Ok(())
    }

    fn save_params(&self) -> serde_json::Value {
        encode_params(&self.params)
    }

    fn load_params(&mut self, params: serde_json::Value) -> PipelineResult<()> {
        if let Some(params) = decode_params::<StackParams>(params)? {
            if params.width == 0 || params.height == 0 {
                return Err(PipelineError::invalid_param("width", "frame size must be non-zero"));
            }
            self.set_params(params);
        }
        Ok(())
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Uniform in `[0, 1)`.
fn unit(hash: u64) -> f64 {
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

fn place_emitters(params: &StackParams) -> Vec<Emitter> {
    let margin = 2.0f64;
    let span = |extent: usize| (extent as f64 - 2.0 * margin).max(0.0);
    (0..params.emitters)
        .map(|e| {
            let h = splitmix64(params.seed ^ (e as u64).wrapping_mul(0xA24B_AED4_963E_E407));
            let x = margin.min(params.width as f64 / 2.0) + unit(h) * span(params.width);
            let y = margin.min(params.height as f64 / 2.0) + unit(splitmix64(h)) * span(params.height);
            Emitter {
                x: x as f32,
                y: y as f32,
            }
        })
        .collect()
}

fn is_on(seed: u64, emitter: usize, index: usize, probability: f64) -> bool {
    let h = splitmix64(
        seed ^ (emitter as u64).wrapping_mul(0x9FB2_1C65_1E98_DF25)
            ^ (index as u64 + 1).wrapping_mul(0xD6E8_FEB8_6659_FD93),
    );
    unit(h) < probability
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_deterministic() {
        let a = SyntheticStackNode::new();
        let b = SyntheticStackNode::new();
        assert_eq!(a.render(3), b.render(3));
        assert_ne!(a.render(3), a.render(4));
    }

    #[test]
    fn test_past_end_is_none() {
        let node = SyntheticStackNode::new();
        assert!(node.render(31).is_some());
        assert!(node.render(32).is_none());
    }

    #[test]
    fn test_background_floor_and_peaks() {
        let node = SyntheticStackNode::with_params(StackParams {
            on_probability: 1.0,
            ..StackParams::default()
        });
        let frame = node.render(0).unwrap();
        let (min, max) = frame.stats().range().unwrap();
        assert!(min >= 100.0);
        assert!(max > 500.0);
    }

    #[test]
    fn test_emitters_inside_frame() {
        let params = StackParams {
            width: 16,
            height: 8,
            emitters: 50,
            ..StackParams::default()
        };
        for e in place_emitters(&params) {
            assert!(e.x >= 0.0 && e.x < 16.0);
            assert!(e.y >= 0.0 && e.y < 8.0);
        }
    }

    #[test]
    fn test_params_round_trip_through_json() {
        let mut node = SyntheticStackNode::new();
        node.load_params(serde_json::json!({ "width": 10, "seed": 7 }))
            .unwrap();
        assert_eq!(node.params().width, 10);
        assert_eq!(node.params().height, 64);
        let saved = node.save_params();
        let mut other = SyntheticStackNode::new();
        other.load_params(saved).unwrap();
        assert_eq!(other.params(), node.params());
        assert!(other.load_params(serde_json::json!({ "width": 0 })).is_err());
    }
}
