use std::time::Duration;

use xcal_core::{CameraId, DeviceIntrinsics, FrameSample, ImageSize};

use crate::intrinsics_io::IntrinsicsLoadError;

/// Outcome of a single `acquire` that did not yield a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// Nothing queued right now; retry on the next cycle.
    #[error("no frame available yet")]
    NoFrameAvailable,
    #[error("end of stream")]
    EndOfStream,
    #[error("device is closed")]
    Closed,
    #[error("device failure: {0}")]
    Device(String),
}

impl AcquireError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AcquireError::NoFrameAvailable)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    #[error("device `{device}` unreachable: {reason}")]
    Unreachable { device: CameraId, reason: String },
    #[error("device `{device}` delivers {actual}, configured for {expected}")]
    UnsupportedMode {
        device: CameraId,
        expected: ImageSize,
        actual: ImageSize,
    },
    #[error("intrinsics for `{device}`: {source}")]
    Intrinsics {
        device: CameraId,
        #[source]
        source: IntrinsicsLoadError,
    },
    #[error("invalid configuration for `{device}`: {reason}")]
    InvalidConfig { device: CameraId, reason: String },
}

/// Uniform view of one camera, independent of its driver.
///
/// An adapter is obtained ready from its variant's `open`; it owns its device
/// exclusively until [`close`](DeviceAdapter::close), which is idempotent.
/// Intrinsics are read once at open and never change afterwards.
pub trait DeviceAdapter {
    fn id(&self) -> &CameraId;

    fn intrinsics(&self) -> &DeviceIntrinsics;

    fn resolution(&self) -> ImageSize;

    /// Nominal time between frames.
    fn nominal_frame_interval(&self) -> Duration;

    /// Next frame, or the reason there is none. Never blocks for longer than
    /// one frame interval.
    fn acquire(&mut self) -> Result<FrameSample, AcquireError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<A: DeviceAdapter + ?Sized> DeviceAdapter for Box<A> {
    fn id(&self) -> &CameraId {
        (**self).id()
    }

    fn intrinsics(&self) -> &DeviceIntrinsics {
        (**self).intrinsics()
    }

    fn resolution(&self) -> ImageSize {
        (**self).resolution()
    }

    fn nominal_frame_interval(&self) -> Duration {
        (**self).nominal_frame_interval()
    }

    fn acquire(&mut self) -> Result<FrameSample, AcquireError> {
        (**self).acquire()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Static description shared by every adapter variant.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub id: CameraId,
    pub intrinsics: DeviceIntrinsics,
    pub resolution: ImageSize,
    pub frame_interval: Duration,
}
