//! Fixed-layout frame header sent as part 0 of every frame
//!
//! The header occupies [`FRAME_HEADER_SIZE`] bytes, little endian. Only the
//! fields listed in the table below are decoded; the remainder is reserved.
//!
//! | Offset | Type | Field               |
//! |--------|------|---------------------|
//! | 0      | u32  | frame_index         |
//! | 4      | u64  | frame_time (µs)     |
//! | 12     | u32  | version             |
//! | 16     | u32  | status              |
//! | 20     | u64  | sonar_timestamp (µs)|
//! | 28     | u32  | ping_mode           |
//! | 32     | u32  | samples_per_beam    |
//! | 36     | u32  | system_type         |
//! | 40     | u32  | serial_number       |
//! | 44     | f32  | water_temp (°C)     |
//! | 48     | f32  | pressure (bar)      |
//! | 52     | u32  | salinity (ppt)      |
//! | 56     | f32  | sound_speed (m/s)   |
//! | 60     | f32  | frame_rate          |
//! | 64     | u32  | sample_period (µs)  |
//! | 68     | u32  | sample_start_delay  |
//! | 72     | u32  | pulse_width (µs)    |
//! | 76     | u32  | focus_position      |
//! | 80     | u32  | receiver_gain (dB)  |
//! | 84     | u32  | transmit_enabled    |
//! | 88     | u32  | enable_150v         |
//! | 92     | u32  | reordered_samples   |
//! | 96     | u32  | applied_settings    |
//! | 100    | u32  | constrained_settings|

use serde::{Deserialize, Serialize};

use super::SystemType;
use crate::{Result, SonarError};

/// Size of the encoded frame header.
pub const FRAME_HEADER_SIZE: usize = 1024;

/// Largest samples-per-beam value accepted from the wire.
pub const MAX_SAMPLES_PER_BEAM: u32 = 4096;

/// Physical transducer channels sampled per ping.
pub const CHANNELS_PER_PING: usize = 16;

/// Acquisition configuration that fixes the frame geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PingMode {
    Mode1,
    Mode3,
    Mode6,
    Mode9,
}

impl PingMode {
    pub const ALL: &'static [PingMode] =
        &[PingMode::Mode1, PingMode::Mode3, PingMode::Mode6, PingMode::Mode9];

    /// Returns `None` for codes outside the allowed set {1, 3, 6, 9}.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(PingMode::Mode1),
            3 => Some(PingMode::Mode3),
            6 => Some(PingMode::Mode6),
            9 => Some(PingMode::Mode9),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            PingMode::Mode1 => 1,
            PingMode::Mode3 => 3,
            PingMode::Mode6 => 6,
            PingMode::Mode9 => 9,
        }
    }

    pub fn pings_per_frame(self) -> usize {
        match self {
            PingMode::Mode1 => 3,
            PingMode::Mode3 => 6,
            PingMode::Mode6 => 4,
            PingMode::Mode9 => 8,
        }
    }

    pub fn beam_count(self) -> usize {
        self.pings_per_frame() * CHANNELS_PER_PING
    }
}

/// Device metadata carried by part 0 of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub frame_index: u32,
    pub frame_time: u64,
    pub version: u32,
    pub status: u32,
    pub sonar_timestamp: u64,
    pub ping_mode: PingMode,
    pub samples_per_beam: u32,
    pub system_type: SystemType,
    pub serial_number: u32,
    pub water_temp: f32,
    pub pressure: f32,
    pub salinity: u32,
    pub sound_speed: f32,
    pub frame_rate: f32,
    pub sample_period: u32,
    pub sample_start_delay: u32,
    pub pulse_width: u32,
    pub focus_position: u32,
    pub receiver_gain: u32,
    pub transmit_enabled: bool,
    pub enable_150v: bool,
    /// Samples are already in beam-major order
    pub reordered_samples: bool,
    /// Cookie of the last settings request the device applied
    pub applied_settings: u32,
    /// Cookie of the last request the device had to constrain
    pub constrained_settings: u32,
}

impl FrameHeader {
    /// Header for a frame of the given geometry with every other field zeroed.
    pub fn new(frame_index: u32, ping_mode: PingMode, samples_per_beam: u32) -> Self {
        Self {
            frame_index,
            frame_time: 0,
            version: 0,
            status: 0,
            sonar_timestamp: 0,
            ping_mode,
            samples_per_beam,
            system_type: SystemType::Aris1800,
            serial_number: 0,
            water_temp: 0.0,
            pressure: 0.0,
            salinity: 0,
            sound_speed: 0.0,
            frame_rate: 0.0,
            sample_period: 0,
            sample_start_delay: 0,
            pulse_width: 0,
            focus_position: 0,
            receiver_gain: 0,
            transmit_enabled: false,
            enable_150v: false,
            reordered_samples: false,
            applied_settings: 0,
            constrained_settings: 0,
        }
    }

    /// Decode and validate a header.
    ///
    /// Fails when the buffer is shorter than [`FRAME_HEADER_SIZE`], the ping
    /// mode is outside the allowed set, or samples-per-beam is zero or above
    /// [`MAX_SAMPLES_PER_BEAM`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(SonarError::parse_error(
                "Frame header",
                format!("need {} bytes, have {}", FRAME_HEADER_SIZE, data.len()),
            ));
        }

        let ping_code = read_u32(data, 28);
        let ping_mode = PingMode::from_code(ping_code).ok_or_else(|| {
            SonarError::parse_error("Frame header", format!("invalid ping mode {}", ping_code))
        })?;

        let samples_per_beam = read_u32(data, 32);
        if samples_per_beam == 0 || samples_per_beam > MAX_SAMPLES_PER_BEAM {
            return Err(SonarError::parse_error(
                "Frame header",
                format!("samples per beam {} outside 1..={}", samples_per_beam, MAX_SAMPLES_PER_BEAM),
            ));
        }

        Ok(Self {
            frame_index: read_u32(data, 0),
            frame_time: read_u64(data, 4),
            version: read_u32(data, 12),
            status: read_u32(data, 16),
            sonar_timestamp: read_u64(data, 20),
            ping_mode,
            samples_per_beam,
            system_type: SystemType::from_code(read_u32(data, 36)),
            serial_number: read_u32(data, 40),
            water_temp: read_f32(data, 44),
            pressure: read_f32(data, 48),
            salinity: read_u32(data, 52),
            sound_speed: read_f32(data, 56),
            frame_rate: read_f32(data, 60),
            sample_period: read_u32(data, 64),
            sample_start_delay: read_u32(data, 68),
            pulse_width: read_u32(data, 72),
            focus_position: read_u32(data, 76),
            receiver_gain: read_u32(data, 80),
            transmit_enabled: read_u32(data, 84) != 0,
            enable_150v: read_u32(data, 88) != 0,
            reordered_samples: read_u32(data, 92) != 0,
            applied_settings: read_u32(data, 96),
            constrained_settings: read_u32(data, 100),
        })
    }

    /// Encode to the fixed wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; FRAME_HEADER_SIZE];
        write_u32(&mut data, 0, self.frame_index);
        data[4..12].copy_from_slice(&self.frame_time.to_le_bytes());
        write_u32(&mut data, 12, self.version);
        write_u32(&mut data, 16, self.status);
        data[20..28].copy_from_slice(&self.sonar_timestamp.to_le_bytes());
        write_u32(&mut data, 28, self.ping_mode.code());
        write_u32(&mut data, 32, self.samples_per_beam);
        write_u32(&mut data, 36, self.system_type.code());
        write_u32(&mut data, 40, self.serial_number);
        write_u32(&mut data, 44, self.water_temp.to_bits());
        write_u32(&mut data, 48, self.pressure.to_bits());
        write_u32(&mut data, 52, self.salinity);
        write_u32(&mut data, 56, self.sound_speed.to_bits());
        write_u32(&mut data, 60, self.frame_rate.to_bits());
        write_u32(&mut data, 64, self.sample_period);
        write_u32(&mut data, 68, self.sample_start_delay);
        write_u32(&mut data, 72, self.pulse_width);
        write_u32(&mut data, 76, self.focus_position);
        write_u32(&mut data, 80, self.receiver_gain);
        write_u32(&mut data, 84, self.transmit_enabled as u32);
        write_u32(&mut data, 88, self.enable_150v as u32);
        write_u32(&mut data, 92, self.reordered_samples as u32);
        write_u32(&mut data, 96, self.applied_settings);
        write_u32(&mut data, 100, self.constrained_settings);
        data
    }

    pub fn beam_count(&self) -> usize {
        self.ping_mode.beam_count()
    }

    /// Total sample bytes implied by the header geometry.
    pub fn sample_bytes(&self) -> usize {
        self.beam_count() * self.samples_per_beam as usize
    }
}

// Callers guarantee `data.len() >= FRAME_HEADER_SIZE`.
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_f32(data: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(data, offset))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
