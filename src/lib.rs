//! Async client library for ARIS imaging sonars.
//!
//! Sonarlink discovers sonars from their UDP beacons, keeps a command
//! connection to the selected device open across network failures, and
//! receives the device's fragmented UDP frame stream as complete,
//! beam-ordered frames.
//!
//! # Features
//!
//! - **Discovery**: begin/end availability events from device beacons
//! - **Reconnecting control**: a state machine with linear backoff that
//!   re-applies the latest settings after every reconnect
//! - **Frame reassembly**: tolerant of duplicated parts, strict about gaps
//! - **Sample reorder**: raw acquisition order to beam-major order
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use sonarlink::{
//!     AcquisitionSettings, AvailabilityListener, ClientConfig, Controller, SettingsAppliedExt,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> sonarlink::Result<()> {
//!     let config = ClientConfig::default();
//!     let mut listener = AvailabilityListener::bind(&config).await?;
//!     let beacon = listener.wait_for(24, Duration::from_secs(10)).await?;
//!
//!     let mut controller = Controller::start(config, None).await?;
//!     controller.follow(&listener, beacon.serial_number);
//!
//!     let settings = AcquisitionSettings::builder(beacon.system_type).frame_rate(12.0).build()?;
//!     let cookie = controller.apply_settings(settings)?;
//!
//!     let mut frames = controller.frames().expect("first call").after_cookie(cookie).boxed();
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {}: {} beams", frame.frame_index(), frame.beam_count());
//!     }
//!
//!     controller.stop().await?;
//!     listener.stop().await?;
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod buffer;
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Device protocols
pub mod command;
pub mod discovery;
pub mod frame;

// Control and streaming
pub mod connection;
pub mod controller;
pub mod stream;

// Core exports
pub use buffer::{SampleBuffer, SampleBufferBuilder};
pub use config::ClientConfig;
pub use error::*;
pub use types::*;

// Main API exports
pub use connection::ConnectionState;
pub use controller::Controller;
pub use discovery::{AvailabilityChange, AvailabilityListener};
pub use frame::{FrameAssembler, FrameListener};
pub use stream::SettingsAppliedExt;
