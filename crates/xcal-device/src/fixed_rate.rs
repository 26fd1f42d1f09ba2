//! Fixed-rate camera: blocking reads, epoch timestamps.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use xcal_core::{CameraId, DeviceIntrinsics, FrameSample, ImageSize, Timestamp};

use crate::adapter::{AcquireError, DeviceAdapter, DeviceInfo, OpenError};
use crate::config::DeviceConfig;
use crate::source::FrameSource;

fn epoch_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Adapter for a camera whose driver hands out frames on demand at a fixed
/// rate (the stereo depth camera of the rig).
///
/// `acquire` waits until the next frame is due, never longer than one frame
/// interval. Frames without a device time are stamped with the wall clock at
/// open plus the nominal frame clock.
pub struct FixedRateCamera<S: FrameSource> {
    info: DeviceInfo,
    source: Option<S>,
    pace: bool,
    epoch_at_open_ns: i64,
    next_due: Instant,
    sequence: u64,
}

impl<S: FrameSource> FixedRateCamera<S> {
    pub fn open(config: &DeviceConfig, source: S) -> Result<Self, OpenError> {
        let info = config.prepare(&source)?;
        debug!(
            "fixed-rate camera `{}`: {} every {:?}",
            info.id, info.resolution, info.frame_interval
        );
        Ok(Self {
            info,
            source: Some(source),
            pace: config.pace,
            epoch_at_open_ns: epoch_now_ns(),
            next_due: Instant::now(),
            sequence: 0,
        })
    }

    fn wait_for_slot(&mut self) {
        if !self.pace {
            return;
        }
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep((self.next_due - now).min(self.info.frame_interval));
            self.next_due += self.info.frame_interval;
        } else {
            // Fell behind: restart the frame clock from now.
            self.next_due = now + self.info.frame_interval;
        }
    }
}

impl<S: FrameSource> DeviceAdapter for FixedRateCamera<S> {
    fn id(&self) -> &CameraId {
        &self.info.id
    }

    fn intrinsics(&self) -> &DeviceIntrinsics {
        &self.info.intrinsics
    }

    fn resolution(&self) -> ImageSize {
        self.info.resolution
    }

    fn nominal_frame_interval(&self) -> Duration {
        self.info.frame_interval
    }

    fn acquire(&mut self) -> Result<FrameSample, AcquireError> {
        if self.source.is_none() {
            return Err(AcquireError::Closed);
        }
        self.wait_for_slot();
        let source = self.source.as_mut().ok_or(AcquireError::Closed)?;
        let raw = source
            .next_frame()
            .map_err(|e| AcquireError::Device(e.to_string()))?
            .ok_or(AcquireError::EndOfStream)?;

        let nanos = raw.device_time_ns.unwrap_or_else(|| {
            self.epoch_at_open_ns + (self.sequence as i64) * self.info.frame_interval.as_nanos() as i64
        });
        let sample = FrameSample {
            camera: self.info.id.clone(),
            image: raw.image,
            timestamp: Timestamp::absolute(nanos),
            sequence: self.sequence,
        };
        self.sequence += 1;
        trace!("`{}` frame {} at {}", self.info.id, sample.sequence, nanos);
        Ok(sample)
    }

    fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("closed fixed-rate camera `{}`", self.info.id);
        }
    }

    fn is_open(&self) -> bool {
        self.source.is_some()
    }
}

impl<S: FrameSource> Drop for FixedRateCamera<S> {
    fn drop(&mut self) {
        self.close();
    }
}
