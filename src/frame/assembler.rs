//! Frame reassembly from stream datagrams
//!
//! The assembler tolerates redelivered parts and discards anything it cannot
//! place. It never emits a partial frame.
//!
//! Rules, in order of evaluation:
//!
//! 1. A datagram that fails to parse resets the frame in progress.
//! 2. Part 0 always resets, then starts a new frame if its header is valid.
//! 3. A sample part with no frame in progress is dropped.
//! 4. A sample part for a different frame index resets.
//! 5. A part number behind the expected one is a duplicate and is ignored.
//! 6. A part number ahead of the expected one is a gap and resets.
//! 7. A part that would overflow the expected sample bytes is dropped; the
//!    frame in progress is kept as is.
//! 8. A frame whose sample bytes reach the expected total is reordered
//!    (unless the header says it already is) and emitted.

use tracing::{debug, trace, warn};

use super::packet::FramePacketHeader;
use super::reorder::reorder;
use crate::buffer::{SampleBuffer, SampleBufferBuilder};
use crate::types::{Frame, FrameHeader};

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Frames emitted
    pub completed: u64,
    /// Partial frames discarded
    pub abandoned: u64,
    /// Redelivered parts ignored
    pub duplicates: u64,
    /// Datagrams dropped without a frame to attach to, or that would overflow
    pub dropped: u64,
    /// Completed frames discarded because the frame stream was never taken
    pub unclaimed: u64,
}

#[derive(Debug)]
struct Reassembly {
    header: FrameHeader,
    frame_index: u32,
    expected_part: u32,
    samples: SampleBufferBuilder,
}

/// Single-owner reassembly state machine.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    in_progress: Option<Reassembly>,
    stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Whether a frame is partially assembled.
    pub fn is_assembling(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Discard any frame in progress.
    pub fn reset(&mut self) {
        if let Some(state) = self.in_progress.take() {
            self.stats.abandoned += 1;
            debug!(
                frame_index = state.frame_index,
                received = state.samples.len(),
                expected = state.samples.capacity(),
                "Abandoned partial frame"
            );
        }
    }

    /// Feed one datagram; returns a frame when it completes one.
    pub fn push(&mut self, datagram: &[u8]) -> Option<Frame> {
        let (packet, payload) = match FramePacketHeader::parse(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Dropping malformed frame packet: {}", e);
                self.stats.dropped += 1;
                self.reset();
                return None;
            }
        };

        if packet.part_number == 0 {
            self.begin_frame(&packet, payload);
            return None;
        }

        self.accept_samples(&packet, payload)
    }

    fn begin_frame(&mut self, packet: &FramePacketHeader, payload: &[u8]) {
        self.reset();

        let header = match FrameHeader::parse(payload) {
            Ok(header) => header,
            Err(e) => {
                debug!(frame_index = packet.frame_index, "Dropping invalid frame header: {}", e);
                self.stats.dropped += 1;
                return;
            }
        };

        let expected = header.sample_bytes();
        trace!(
            frame_index = packet.frame_index,
            ping_mode = header.ping_mode.code(),
            samples_per_beam = header.samples_per_beam,
            expected,
            "Starting frame"
        );
        self.in_progress = Some(Reassembly {
            header,
            frame_index: packet.frame_index,
            expected_part: 1,
            samples: SampleBuffer::builder(expected),
        });
    }

    fn accept_samples(&mut self, packet: &FramePacketHeader, payload: &[u8]) -> Option<Frame> {
        let Some(state) = self.in_progress.as_mut() else {
            trace!(
                frame_index = packet.frame_index,
                part = packet.part_number,
                "Sample part without frame header"
            );
            self.stats.dropped += 1;
            return None;
        };

        if packet.frame_index != state.frame_index {
            debug!(
                expected = state.frame_index,
                received = packet.frame_index,
                "Frame index changed mid-frame"
            );
            self.reset();
            return None;
        }

        if packet.part_number < state.expected_part {
            trace!(part = packet.part_number, "Ignoring duplicate part");
            self.stats.duplicates += 1;
            return None;
        }

        if packet.part_number > state.expected_part {
            debug!(
                expected = state.expected_part,
                received = packet.part_number,
                "Gap in frame parts"
            );
            self.reset();
            return None;
        }

        if !state.samples.append(payload) {
            warn!(
                frame_index = state.frame_index,
                part = packet.part_number,
                payload = payload.len(),
                remaining = state.samples.remaining(),
                "Dropping part that overflows the frame"
            );
            self.stats.dropped += 1;
            return None;
        }
        state.expected_part += 1;

        if !state.samples.is_full() {
            return None;
        }

        let state = self.in_progress.take()?;
        self.finish(state)
    }

    fn finish(&mut self, state: Reassembly) -> Option<Frame> {
        let Reassembly { mut header, frame_index, samples, .. } = state;
        let raw = samples.finish();

        let samples = if header.reordered_samples {
            raw
        } else {
            match reorder(header.ping_mode, header.samples_per_beam as usize, &raw) {
                Ok(ordered) => {
                    header.reordered_samples = true;
                    ordered
                }
                Err(e) => {
                    warn!(frame_index, "Failed to reorder samples: {}", e);
                    self.stats.abandoned += 1;
                    return None;
                }
            }
        };

        match Frame::new(header, samples) {
            Ok(frame) => {
                self.stats.completed += 1;
                trace!(frame_index, "Frame complete");
                Some(frame)
            }
            Err(e) => {
                warn!(frame_index, "Assembled frame rejected: {}", e);
                self.stats.abandoned += 1;
                None
            }
        }
    }
}
