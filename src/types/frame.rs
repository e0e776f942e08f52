//! Complete sonar frames

use super::FrameHeader;
use crate::buffer::SampleBuffer;
use crate::{Result, SonarError};

/// One complete acquisition: header plus beam-major samples.
///
/// The sample buffer always holds exactly `beam_count * samples_per_beam`
/// bytes. Cloning is cheap; samples are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    header: FrameHeader,
    samples: SampleBuffer,
}

impl Frame {
    /// Create a frame, rejecting buffers that disagree with the header geometry.
    pub fn new(header: FrameHeader, samples: SampleBuffer) -> Result<Self> {
        let expected = header.sample_bytes();
        if samples.len() != expected {
            return Err(SonarError::FrameGeometry { expected, actual: samples.len() });
        }
        Ok(Self { header, samples })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    pub fn frame_index(&self) -> u32 {
        self.header.frame_index
    }

    pub fn beam_count(&self) -> usize {
        self.header.beam_count()
    }

    pub fn samples_per_beam(&self) -> usize {
        self.header.samples_per_beam as usize
    }

    /// Sample intensity for one beam at one range bin.
    ///
    /// Only meaningful once samples are in beam-major order, which holds for
    /// every frame produced by the assembler.
    pub fn sample(&self, beam: usize, sample_index: usize) -> Option<u8> {
        if beam >= self.beam_count() || sample_index >= self.samples_per_beam() {
            return None;
        }
        self.samples.get(sample_index * self.beam_count() + beam).copied()
    }

    /// Split into header and samples.
    pub fn into_parts(self) -> (FrameHeader, SampleBuffer) {
        (self.header, self.samples)
    }
}
