//! Channel-to-beam sample reordering
//!
//! The device emits samples in acquisition order: ping by ping, then range
//! bin by range bin, with the 16 transducer channels of each ping
//! interleaved. Consumers want beam-major order, where the bytes of one
//! range bin across all beams are contiguous.
//!
//! For an input byte at `(ping, sample, channel)` the output position is
//!
//! ```text
//! sample * beam_count + ping + CHANNEL_MAP[channel] * pings_per_frame
//! ```

use crate::buffer::SampleBuffer;
use crate::types::{CHANNELS_PER_PING, PingMode};
use crate::{Result, SonarError};

/// Target beam group for each physical channel of a ping.
pub const CHANNEL_MAP: [usize; CHANNELS_PER_PING] =
    [10, 2, 14, 6, 8, 0, 12, 4, 11, 3, 15, 7, 9, 1, 13, 5];

/// Reorder raw acquisition-order samples into beam-major order.
///
/// The transform is pure and does not check whether the input was already
/// reordered; that is the caller's concern.
pub fn reorder(
    ping_mode: PingMode,
    samples_per_beam: usize,
    input: &SampleBuffer,
) -> Result<SampleBuffer> {
    check_len(ping_mode, samples_per_beam, input)?;
    Ok(input.transform(|src, dst| {
        for_each_position(ping_mode, samples_per_beam, |raw, ordered| dst[ordered] = src[raw])
    }))
}

/// Inverse of [`reorder`]: beam-major samples back to acquisition order.
pub fn restore_acquisition_order(
    ping_mode: PingMode,
    samples_per_beam: usize,
    input: &SampleBuffer,
) -> Result<SampleBuffer> {
    check_len(ping_mode, samples_per_beam, input)?;
    Ok(input.transform(|src, dst| {
        for_each_position(ping_mode, samples_per_beam, |raw, ordered| dst[raw] = src[ordered])
    }))
}

/// Visit every (acquisition index, beam-major index) pair.
fn for_each_position<F>(ping_mode: PingMode, samples_per_beam: usize, mut visit: F)
where
    F: FnMut(usize, usize),
{
    let pings_per_frame = ping_mode.pings_per_frame();
    let beam_count = ping_mode.beam_count();
    let mut raw = 0;

    for ping in 0..pings_per_frame {
        for sample in 0..samples_per_beam {
            let row = sample * beam_count + ping;
            for mapped in CHANNEL_MAP {
                visit(raw, row + mapped * pings_per_frame);
                raw += 1;
            }
        }
    }
}

fn check_len(ping_mode: PingMode, samples_per_beam: usize, input: &SampleBuffer) -> Result<()> {
    let expected = ping_mode.beam_count() * samples_per_beam;
    if input.len() != expected {
        return Err(SonarError::FrameGeometry { expected, actual: input.len() });
    }
    Ok(())
}
