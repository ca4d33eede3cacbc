//! Reconstruction node: renders particles as a magnified 2-D histogram.
//!
//! Frame `i` accumulates every particle found in frames `0..=i`, so stepping
//! through the indices shows the super-resolved image building up.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{NodeContext, NodePlugin};
use crate::pipeline::nodes::{decode_params, encode_params, param_f64, param_positive};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::types::{Frame, ParticleSet};
use serde::{Deserialize, Serialize};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Coordinates),
    PortDescriptor::output("out", PortKind::Reconstruction),
];

/// Largest output edge, in pixels.
const MAX_EDGE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructParams {
    /// Output pixels per input pixel
    pub magnification: usize,
    /// Add the particle intensity instead of a count of one
    pub weight_by_intensity: bool,
    /// Drop particles with an intensity below this
    pub min_intensity: f64,
}

impl Default for ReconstructParams {
    fn default() -> Self {
        Self {
            magnification: 4,
            weight_by_intensity: false,
            min_intensity: 0.0,
        }
    }
}

/// Render particles from frames `0..=index`.
pub fn render(particles: &ParticleSet, index: usize, params: &ReconstructParams) -> Frame {
    let mag = params.magnification.max(1);
    let width = (particles.width * mag).min(MAX_EDGE);
    let height = (particles.height * mag).min(MAX_EDGE);
    let mut frame = Frame::zeros(index, width, height);
    for p in particles.up_to_frame(index) {
        if p.intensity < params.min_intensity || p.x < 0.0 || p.y < 0.0 {
            continue;
        }
        let x = (p.x * mag as f64 + 0.5) as usize;
        let y = (p.y * mag as f64 + 0.5) as usize;
        if let Some(px) = frame.get_mut(x, y) {
            *px += if params.weight_by_intensity {
                p.intensity as f32
            } else {
                1.0
            };
        }
    }
    frame
}

pub struct ReconstructionNode {
    params: ReconstructParams,
}

impl ReconstructionNode {
    pub fn new() -> Self {
        Self {
            params: ReconstructParams::default(),
        }
    }
}

impl Default for ReconstructionNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for ReconstructionNode {
    fn type_name(&self) -> &str {
        "Reconstruction"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn caches_frames(&self) -> bool {
        true
    }

    fn produce_frame(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<Option<Frame>> {
        Ok(ctx
            .pull_particles("in")
            .map(|particles| render(&particles, index, &self.params)))
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        match key {
            "magnification" => self.params.magnification = param_positive(key, value)?,
            "weight_by_intensity" => {
                self.params.weight_by_intensity = value
                    .as_bool()
                    .ok_or_else(|| PipelineError::invalid_param(key, "expected a boolean"))?;
            }
            "min_intensity" => self.params.min_intensity = param_f64(key, value)?,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticleRecord;

    fn particle(frame: usize, x: f64, y: f64) -> ParticleRecord {
        ParticleRecord {
            frame,
            x,
            y,
            intensity: 10.0,
            sigma: 1.0,
        }
    }

    #[test]
    fn test_accumulates_up_to_index() {
        let mut set = ParticleSet::new(4, 4);
        set.push(particle(0, 1.0, 1.0));
        set.push(particle(1, 1.0, 1.0));
        set.push(particle(2, 3.0, 0.0));
        let params = ReconstructParams {
            magnification: 2,
            ..ReconstructParams::default()
        };

        let f0 = render(&set, 0, &params);
        assert_eq!((f0.width, f0.height), (8, 8));
        assert_eq!(f0.get(2, 2), Some(1.0));
        let f1 = render(&set, 1, &params);
        assert_eq!(f1.get(2, 2), Some(2.0));
        let f2 = render(&set, 2, &params);
        assert_eq!(f2.get(6, 0), Some(1.0));
        assert_eq!(f2.index, 2);
    }

    #[test]
    fn test_intensity_weighting_and_cutoff() {
        let mut set = ParticleSet::new(2, 2);
        set.push(particle(0, 0.0, 0.0));
        let weighted = ReconstructParams {
            magnification: 1,
            weight_by_intensity: true,
            min_intensity: 0.0,
        };
        assert_eq!(render(&set, 0, &weighted).get(0, 0), Some(10.0));
        let cut = ReconstructParams {
            min_intensity: 50.0,
            ..weighted
        };
        assert_eq!(render(&set, 0, &cut).get(0, 0), Some(0.0));
    }
}
