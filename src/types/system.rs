//! Device model and environment enums

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PingMode;

/// Sonar hardware family reported in beacons and frame headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemType {
    Aris1800,
    Aris3000,
    Aris1200,
    Unknown(u32),
}

impl SystemType {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => SystemType::Aris1800,
            1 => SystemType::Aris3000,
            2 => SystemType::Aris1200,
            other => SystemType::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            SystemType::Aris1800 => 0,
            SystemType::Aris3000 => 1,
            SystemType::Aris1200 => 2,
            SystemType::Unknown(code) => code,
        }
    }

    /// Ping modes the hardware can run.
    ///
    /// Unknown models are not restricted; the device has the final say.
    pub fn supported_ping_modes(self) -> &'static [PingMode] {
        match self {
            SystemType::Aris1800 => &[PingMode::Mode1, PingMode::Mode3],
            SystemType::Aris3000 => &[PingMode::Mode6, PingMode::Mode9],
            SystemType::Aris1200 => &[PingMode::Mode1],
            SystemType::Unknown(_) => PingMode::ALL,
        }
    }

    /// Ping mode used when settings do not name one.
    pub fn default_ping_mode(self) -> PingMode {
        match self {
            SystemType::Aris1800 => PingMode::Mode3,
            SystemType::Aris3000 => PingMode::Mode9,
            SystemType::Aris1200 | SystemType::Unknown(_) => PingMode::Mode1,
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemType::Aris1800 => f.write_str("ARIS 1800"),
            SystemType::Aris3000 => f.write_str("ARIS 3000"),
            SystemType::Aris1200 => f.write_str("ARIS 1200"),
            SystemType::Unknown(code) => write!(f, "unknown system type {}", code),
        }
    }
}

/// Water type, used by the device for sound speed estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Salinity {
    Fresh,
    Brackish,
    Seawater,
}

impl Salinity {
    /// Keyword used on the command channel.
    pub fn as_command_str(self) -> &'static str {
        match self {
            Salinity::Fresh => "fresh",
            Salinity::Brackish => "brackish",
            Salinity::Seawater => "seawater",
        }
    }

    /// Parts per thousand, as recorded in frame headers.
    pub fn ppt(self) -> u32 {
        match self {
            Salinity::Fresh => 0,
            Salinity::Brackish => 15,
            Salinity::Seawater => 35,
        }
    }
}
