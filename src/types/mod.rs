//! Core types for sonar discovery and frame data.
//!
//! ## Architecture
//!
//! - [`Beacon`] is a decoded presence announcement for one device
//! - [`FrameHeader`] is the fixed-layout metadata sent ahead of each frame
//! - [`Frame`] pairs a header with a geometry-checked sample buffer
//! - [`PingMode`] fixes the beam count and pings per frame
//! - [`AcquisitionSettings`] are validated against the [`SystemType`]'s
//!   operating ranges at construction
//!
//! ## Usage Example
//!
//! ```rust
//! use sonarlink::types::{Frame, FrameHeader, PingMode};
//! use sonarlink::SampleBuffer;
//!
//! let header = FrameHeader::new(1, PingMode::Mode1, 2);
//! let samples = SampleBuffer::from(vec![0u8; header.sample_bytes()]);
//! let frame = Frame::new(header, samples).unwrap();
//! assert_eq!(frame.beam_count(), 48);
//! ```

mod beacon;
mod frame;
mod frame_header;
mod settings;
mod system;

pub use beacon::{Beacon, BeaconVariant, ConnectionAvailability, SoftwareVersion};
pub use frame::Frame;
pub use frame_header::{
    CHANNELS_PER_PING, FRAME_HEADER_SIZE, FrameHeader, MAX_SAMPLES_PER_BEAM, PingMode,
};
pub use settings::{AcquisitionSettings, AcquisitionSettingsBuilder, SettingsRequest};
pub use system::{Salinity, SystemType};
