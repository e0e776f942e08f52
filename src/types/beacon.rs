//! Availability beacon records

use std::fmt;
use std::net::SocketAddr;
use tokio::time::Instant;

use super::SystemType;

/// Firmware version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SoftwareVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Whether the device will accept a new command connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionAvailability {
    Available,
    Busy,
    Unknown(u32),
}

impl ConnectionAvailability {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ConnectionAvailability::Available,
            1 => ConnectionAvailability::Busy,
            other => ConnectionAvailability::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            ConnectionAvailability::Available => 0,
            ConnectionAvailability::Busy => 1,
            ConnectionAvailability::Unknown(code) => code,
        }
    }
}

/// Sub-model specific beacon content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BeaconVariant {
    Explorer,
    Voyager,
    Defender {
        /// On-board recording is active
        recording: bool,
        /// On-board storage use, 0-100
        storage_percent_full: u32,
    },
}

/// A single presence announcement.
///
/// Beacons are never mutated; a newer beacon for the same serial number
/// supersedes the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    /// Local receive time
    pub received_at: Instant,
    /// Sender of the datagram
    pub source: SocketAddr,
    pub system_type: SystemType,
    pub serial_number: u32,
    pub software_version: SoftwareVersion,
    pub connection_availability: ConnectionAvailability,
    /// CPU temperature in degrees Celsius
    pub cpu_temp: f32,
    pub variant: BeaconVariant,
}

impl Beacon {
    pub fn is_available(&self) -> bool {
        self.connection_availability == ConnectionAvailability::Available
    }
}
