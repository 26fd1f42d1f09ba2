//! Extrinsic calibration of a two-camera rig from a shared circle-grid
//! target.
//!
//! This crate ties the `xcal-*` crates together:
//! - re-exports of the device, detector, capture and solver crates;
//! - [`session`]: a JSON-configured session that opens both cameras, captures
//!   operator-confirmed views, solves for the relative pose and writes the
//!   calibration file;
//! - the `xcal` command-line tool (feature `cli`).
//!
//! ## Quickstart
//!
//! ```no_run
//! use xcal::capture::control_channel;
//! use xcal::session::{run_session, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::load("session.json")?;
//! let (operator, control) = control_channel();
//! // Hand `operator` to whatever collects confirmations, then:
//! # drop(operator);
//! let outcome = run_session(&config, control)?;
//! println!("R = {}", outcome.result.rotation);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `xcal::core`: target geometry, intrinsics, frames, timestamps.
//! - `xcal::device`: camera adapters and intrinsics readers.
//! - `xcal::detect`: circle-grid detector.
//! - `xcal::capture`: capture scheduler and correspondence accumulator.
//! - `xcal::solve`: stereo solver, rectification and the calibration store.

pub use xcal_capture as capture;
pub use xcal_core as core;
pub use xcal_detect as detect;
pub use xcal_device as device;
pub use xcal_solve as solve;

pub use xcal_core::{DeviceIntrinsics, TargetGeometry};
pub use xcal_solve::CalibrationResult;

pub mod session;
