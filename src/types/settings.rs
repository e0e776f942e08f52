//! Acquisition settings and settings requests

use super::{PingMode, SystemType};
use crate::{Result, SonarError};

pub const FRAME_RATE_RANGE: (f32, f32) = (1.0, 15.0);
pub const SAMPLES_PER_BEAM_RANGE: (u32, u32) = (128, 4096);
pub const SAMPLE_PERIOD_RANGE_US: (u32, u32) = (4, 100);
pub const PULSE_WIDTH_RANGE_US: (u32, u32) = (4, 80);
pub const SAMPLE_START_DELAY_RANGE_US: (u32, u32) = (930, 60_000);
pub const RECEIVER_GAIN_RANGE_DB: (u32, u32) = (0, 24);

/// Validated acquisition settings for one system type.
///
/// Construct through [`AcquisitionSettings::builder`]; values outside the
/// device's operating range are rejected when building.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    system_type: SystemType,
    ping_mode: PingMode,
    frame_rate: f32,
    samples_per_beam: u32,
    sample_start_delay: u32,
    sample_period: u32,
    pulse_width: u32,
    receiver_gain: u32,
    enable_transmit: bool,
    enable_150v: bool,
}

impl AcquisitionSettings {
    pub fn builder(system_type: SystemType) -> AcquisitionSettingsBuilder {
        AcquisitionSettingsBuilder::new(system_type)
    }

    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    pub fn ping_mode(&self) -> PingMode {
        self.ping_mode
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn samples_per_beam(&self) -> u32 {
        self.samples_per_beam
    }

    /// Body lines of a `set_acquire` request, without the cookie line.
    pub fn command_lines(&self) -> Vec<String> {
        vec![
            "set_acquire".to_string(),
            format!("frame_rate {:.1}", self.frame_rate),
            format!("ping_mode {}", self.ping_mode.code()),
            format!("samples_per_beam {}", self.samples_per_beam),
            format!("sample_start_delay {}", self.sample_start_delay),
            format!("sample_period {}", self.sample_period),
            format!("pulse_width {}", self.pulse_width),
            format!("receiver_gain {}", self.receiver_gain),
            format!("enable_transmit {}", self.enable_transmit as u8),
            format!("enable_150v {}", self.enable_150v as u8),
        ]
    }
}

/// Builder for [`AcquisitionSettings`].
#[derive(Debug, Clone)]
pub struct AcquisitionSettingsBuilder {
    settings: AcquisitionSettings,
}

impl AcquisitionSettingsBuilder {
    fn new(system_type: SystemType) -> Self {
        Self {
            settings: AcquisitionSettings {
                system_type,
                ping_mode: system_type.default_ping_mode(),
                frame_rate: 10.0,
                samples_per_beam: 1024,
                sample_start_delay: 930,
                sample_period: 8,
                pulse_width: 12,
                receiver_gain: 12,
                enable_transmit: true,
                enable_150v: true,
            },
        }
    }

    pub fn ping_mode(mut self, ping_mode: PingMode) -> Self {
        self.settings.ping_mode = ping_mode;
        self
    }

    pub fn frame_rate(mut self, frame_rate: f32) -> Self {
        self.settings.frame_rate = frame_rate;
        self
    }

    pub fn samples_per_beam(mut self, samples_per_beam: u32) -> Self {
        self.settings.samples_per_beam = samples_per_beam;
        self
    }

    pub fn sample_start_delay(mut self, microseconds: u32) -> Self {
        self.settings.sample_start_delay = microseconds;
        self
    }

    pub fn sample_period(mut self, microseconds: u32) -> Self {
        self.settings.sample_period = microseconds;
        self
    }

    pub fn pulse_width(mut self, microseconds: u32) -> Self {
        self.settings.pulse_width = microseconds;
        self
    }

    pub fn receiver_gain(mut self, decibels: u32) -> Self {
        self.settings.receiver_gain = decibels;
        self
    }

    pub fn enable_transmit(mut self, enabled: bool) -> Self {
        self.settings.enable_transmit = enabled;
        self
    }

    pub fn enable_150v(mut self, enabled: bool) -> Self {
        self.settings.enable_150v = enabled;
        self
    }

    pub fn build(self) -> Result<AcquisitionSettings> {
        let s = self.settings;

        if !s.system_type.supported_ping_modes().contains(&s.ping_mode) {
            return Err(SonarError::invalid_settings(format!(
                "ping mode {} is not supported by {}",
                s.ping_mode.code(),
                s.system_type
            )));
        }
        if !s.frame_rate.is_finite()
            || s.frame_rate < FRAME_RATE_RANGE.0
            || s.frame_rate > FRAME_RATE_RANGE.1
        {
            return Err(SonarError::invalid_settings(format!(
                "frame rate {} outside {}..={}",
                s.frame_rate, FRAME_RATE_RANGE.0, FRAME_RATE_RANGE.1
            )));
        }
        check_range("samples per beam", s.samples_per_beam, SAMPLES_PER_BEAM_RANGE)?;
        check_range("sample start delay", s.sample_start_delay, SAMPLE_START_DELAY_RANGE_US)?;
        check_range("sample period", s.sample_period, SAMPLE_PERIOD_RANGE_US)?;
        check_range("pulse width", s.pulse_width, PULSE_WIDTH_RANGE_US)?;
        check_range("receiver gain", s.receiver_gain, RECEIVER_GAIN_RANGE_DB)?;

        Ok(s)
    }
}

fn check_range(name: &str, value: u32, (low, high): (u32, u32)) -> Result<()> {
    if value < low || value > high {
        return Err(SonarError::invalid_settings(format!(
            "{} {} outside {}..={}",
            name, value, low, high
        )));
    }
    Ok(())
}

/// Settings tagged with the cookie that will echo back in frame headers.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsRequest {
    pub cookie: u32,
    pub settings: AcquisitionSettings,
}

impl SettingsRequest {
    pub fn new(cookie: u32, settings: AcquisitionSettings) -> Self {
        Self { cookie, settings }
    }
}
