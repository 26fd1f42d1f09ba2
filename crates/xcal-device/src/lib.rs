//! Device adapters for a two-camera calibration rig.
//!
//! Both cameras are driven through [`DeviceAdapter`], so the capture loop
//! never needs to know which vendor stack sits underneath:
//!
//! - [`FixedRateCamera`] wraps a driver that blocks for each frame at a fixed
//!   rate and stamps frames with epoch time;
//! - [`EventCamera`] wraps a driver that streams frames from its own thread
//!   and stamps them relative to stream start.
//!
//! Where frames come from is the [`FrameSource`] boundary. Recorded image
//! sequences and in-memory frames are provided.

mod adapter;
mod config;
mod event;
mod fixed_rate;
mod intrinsics_io;
mod source;

pub use adapter::{AcquireError, DeviceAdapter, DeviceInfo, OpenError};
pub use config::{open_device, DeviceConfig, DeviceKind, IntrinsicsConfig, SourceConfig};
pub use event::EventCamera;
pub use fixed_rate::FixedRateCamera;
pub use intrinsics_io::{
    load_intrinsics_json, load_opencv_xml, parse_opencv_xml, write_intrinsics_json,
    IntrinsicsFile, IntrinsicsLoadError,
};
pub use source::{FrameSource, ImageSequenceSource, MemorySource, RawFrame, SourceError};
