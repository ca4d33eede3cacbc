//! Core data types for FrameFlow
//!
//! This module contains the value types that flow through the dataflow graph.
//! They carry no behaviour beyond identity, their cached payload and a few
//! derived metrics.
//!
//! # Main Types
//!
//! - [`Frame`] - One image-like data unit produced for a given stack index
//! - [`FrameStats`] - Running min/max/mean over a frame's pixels
//! - [`ParticleRecord`] - A single localized point-like emitter
//! - [`ParticleSet`] - The aggregate collection produced by fitting nodes
//!
//! # Statistics
//!
//! [`FrameStats`] provides O(1) updates so nodes can accumulate statistics
//! while they walk a frame instead of making a second pass.

use serde::{Deserialize, Serialize};

/// A single frame of a stack: row-major `f32` pixels tagged with the index it
/// was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Stack index this frame was produced for
    pub index: usize,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
    /// Row-major pixel payload, `width * height` values
    pub pixels: Vec<f32>,
}

impl Frame {
    /// Create a frame filled with zeros
    pub fn zeros(index: usize, width: usize, height: usize) -> Self {
        Self {
            index,
            width,
            height,
            pixels: vec![0.0; width * height],
        }
    }

    /// Create a frame from an existing pixel buffer.
    ///
    /// Returns `None` if the buffer length does not match `width * height`.
    pub fn from_pixels(index: usize, width: usize, height: usize, pixels: Vec<f32>) -> Option<Self> {
        if pixels.len() != width * height {
            return None;
        }
        Some(Self {
            index,
            width,
            height,
            pixels,
        })
    }

    /// Number of pixels in the frame
    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the frame has no pixels
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Pixel value at `(x, y)`, or `None` outside the frame
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    /// Mutable pixel at `(x, y)`
    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut f32> {
        if x < self.width && y < self.height {
            Some(&mut self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    /// Iterate over the rows of the frame
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks(0) panics; a zero-width frame has no pixels anyway
        self.pixels.chunks(self.width.max(1))
    }

    /// Same geometry as `other`
    pub fn same_shape(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Compute pixel statistics
    pub fn stats(&self) -> FrameStats {
        let mut stats = FrameStats::new();
        for &p in &self.pixels {
            stats.push(p as f64);
        }
        stats
    }
}

/// Incremental statistics over pixel values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Number of values seen
    pub count: u64,
    /// Running sum for the mean
    pub sum: f64,
    /// Current minimum value
    pub min: f64,
    /// Current maximum value
    pub max: f64,
}

impl FrameStats {
    /// Create an empty stats tracker
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Add a value
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Mean of all values, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// Min/max pair, `None` when empty
    pub fn range(&self) -> Option<(f64, f64)> {
        if self.count == 0 {
            None
        } else {
            Some((self.min, self.max))
        }
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A detected or fitted point-like emitter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Stack index of the frame the particle was found in
    pub frame: usize,
    /// Sub-pixel x position (pixels)
    pub x: f64,
    /// Sub-pixel y position (pixels)
    pub y: f64,
    /// Integrated intensity of the neighbourhood above background
    pub intensity: f64,
    /// RMS spread of the neighbourhood (pixels)
    pub sigma: f64,
}

/// Aggregate collection of particles plus the geometry of the frames they
/// came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleSet {
    /// Width of the source frames
    pub width: usize,
    /// Height of the source frames
    pub height: usize,
    /// Number of source frames that were processed
    pub frame_count: usize,
    /// The particles, ordered by frame
    pub particles: Vec<ParticleRecord>,
}

impl ParticleSet {
    /// Create an empty set for frames of the given geometry
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            particles: Vec::new(),
        }
    }

    /// Number of particles
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether the set holds no particles
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Add a particle
    pub fn push(&mut self, particle: ParticleRecord) {
        self.particles.push(particle);
    }

    /// Particles found in frames `0..=index`
    pub fn up_to_frame(&self, index: usize) -> impl Iterator<Item = &ParticleRecord> {
        self.particles.iter().filter(move |p| p.frame <= index)
    }

    /// Particles found in one frame
    pub fn in_frame(&self, index: usize) -> impl Iterator<Item = &ParticleRecord> {
        self.particles.iter().filter(move |p| p.frame == index)
    }

    /// Sort particles by frame, then position, for stable output
    pub fn sort(&mut self) {
        self.particles.sort_by(|a, b| {
            a.frame
                .cmp(&b.frame)
                .then(a.y.total_cmp(&b.y))
                .then(a.x.total_cmp(&b.x))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_pixels_checks_length() {
        assert!(Frame::from_pixels(0, 2, 2, vec![0.0; 4]).is_some());
        assert!(Frame::from_pixels(0, 2, 2, vec![0.0; 3]).is_none());
    }

    #[test]
    fn test_frame_get() {
        let frame = Frame::from_pixels(3, 3, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(frame.get(2, 1), Some(5.0));
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.rows().count(), 2);
    }

    #[test]
    fn test_frame_stats() {
        let frame = Frame::from_pixels(0, 2, 2, vec![1.0, 2.0, 3.0, 6.0]).unwrap();
        let stats = frame.stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean(), Some(3.0));
        assert_eq!(stats.range(), Some((1.0, 6.0)));
        assert_eq!(FrameStats::new().mean(), None);
    }

    #[test]
    fn test_particle_set_filters() {
        let mut set = ParticleSet::new(8, 8);
        for frame in [2, 0, 1, 2] {
            set.push(ParticleRecord {
                frame,
                x: 1.0,
                y: 1.0,
                intensity: 10.0,
                sigma: 1.0,
            });
        }
        set.sort();
        assert_eq!(set.particles[0].frame, 0);
        assert_eq!(set.up_to_frame(1).count(), 2);
        assert_eq!(set.in_frame(2).count(), 2);
    }
}
