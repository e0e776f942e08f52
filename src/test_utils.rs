//! Test utilities for building device traffic
//!
//! Helpers here produce the byte streams a real sonar would send, so unit
//! tests, integration tests and benchmarks share one definition of the wire
//! formats.

#![cfg(any(test, feature = "benchmark"))]

use std::net::SocketAddr;

use crate::buffer::SampleBuffer;
use crate::discovery::decoder::encode_beacon;
use crate::frame::packet::encode_packet;
use crate::types::{
    Beacon, BeaconVariant, ConnectionAvailability, FRAME_HEADER_SIZE, FrameHeader, PingMode,
    SoftwareVersion, SystemType,
};

/// Deterministic acquisition-order samples for one frame.
pub fn raw_samples(ping_mode: PingMode, samples_per_beam: usize) -> SampleBuffer {
    let len = ping_mode.beam_count() * samples_per_beam;
    SampleBuffer::from((0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<u8>>())
}

/// Split a frame into the datagrams of the frame stream.
///
/// Part 0 carries the header; sample parts carry at most `chunk` bytes each.
pub fn frame_datagrams(header: &FrameHeader, samples: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let frame_size = (FRAME_HEADER_SIZE + samples.len()) as u32;
    let mut datagrams = vec![encode_packet(header.frame_index, 0, frame_size, &header.to_bytes())];
    for (i, part) in samples.chunks(chunk.max(1)).enumerate() {
        datagrams.push(encode_packet(header.frame_index, i as u32 + 1, frame_size, part));
    }
    datagrams
}

/// A beacon as the registry would see it.
pub fn beacon(serial_number: u32, source: SocketAddr) -> Beacon {
    Beacon {
        received_at: tokio::time::Instant::now(),
        source,
        system_type: SystemType::Aris1800,
        serial_number,
        software_version: SoftwareVersion { major: 2, minor: 8, build: 4100 },
        connection_availability: ConnectionAvailability::Available,
        cpu_temp: 41.5,
        variant: BeaconVariant::Explorer,
    }
}

/// Wire payload for a beacon.
pub fn beacon_payload(serial_number: u32) -> Vec<u8> {
    let source: SocketAddr = ([127, 0, 0, 1], 0).into();
    encode_beacon(&beacon(serial_number, source))
}
