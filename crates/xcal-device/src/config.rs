use std::path::PathBuf;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use xcal_core::{CameraId, DeviceIntrinsics, ImageSize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::adapter::{DeviceAdapter, DeviceInfo, OpenError};
use crate::event::EventCamera;
use crate::fixed_rate::FixedRateCamera;
use crate::intrinsics_io::{load_intrinsics_json, load_opencv_xml, IntrinsicsLoadError};
use crate::source::{FrameSource, ImageSequenceSource};

/// How a device delivers frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Blocking reads at a fixed rate, epoch timestamps.
    FixedRate,
    /// Frames arrive on a background stream, timestamps relative to stream start.
    Event,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Directory of recorded frames.
    ImageDir { path: PathBuf },
}

impl SourceConfig {
    pub fn open(&self) -> Result<ImageSequenceSource, crate::source::SourceError> {
        match self {
            SourceConfig::ImageDir { path } => ImageSequenceSource::open(path),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum IntrinsicsConfig {
    Json { path: PathBuf },
    OpencvXml { path: PathBuf, node: String },
    Inline(DeviceIntrinsics),
}

impl IntrinsicsConfig {
    pub fn load(&self) -> Result<DeviceIntrinsics, IntrinsicsLoadError> {
        match self {
            IntrinsicsConfig::Json { path } => load_intrinsics_json(path),
            IntrinsicsConfig::OpencvXml { path, node } => load_opencv_xml(path, node),
            IntrinsicsConfig::Inline(intrinsics) => {
                intrinsics.validate()?;
                Ok(intrinsics.clone())
            }
        }
    }
}

fn default_fps() -> f64 {
    30.0
}

fn default_pace() -> bool {
    true
}

fn default_queue_depth() -> usize {
    4
}

/// One camera of a calibration session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: CameraId,
    pub kind: DeviceKind,
    #[serde(default = "default_fps")]
    pub fps: f64,
    pub source: SourceConfig,
    pub intrinsics: IntrinsicsConfig,
    /// Requested capture mode; opening fails if the device delivers another.
    #[serde(default)]
    pub expected_resolution: Option<ImageSize>,
    /// Release frames no faster than `fps`. Off for offline playback.
    #[serde(default = "default_pace")]
    pub pace: bool,
    /// Frames buffered between an event camera's reader and the scheduler.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl DeviceConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    pub fn validate(&self) -> Result<(), OpenError> {
        let invalid = |reason: String| OpenError::InvalidConfig {
            device: self.id.clone(),
            reason,
        };
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(invalid(format!("fps must be positive, got {}", self.fps)));
        }
        if self.kind == DeviceKind::Event && self.queue_depth == 0 {
            return Err(invalid("queue_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Validate the config against an opened source and read intrinsics.
    pub(crate) fn prepare(&self, source: &dyn FrameSource) -> Result<DeviceInfo, OpenError> {
        self.validate()?;
        let resolution = source.resolution();
        if let Some(expected) = self.expected_resolution {
            if expected != resolution {
                return Err(OpenError::UnsupportedMode {
                    device: self.id.clone(),
                    expected,
                    actual: resolution,
                });
            }
        }
        let intrinsics = self
            .intrinsics
            .load()
            .map_err(|source| OpenError::Intrinsics {
                device: self.id.clone(),
                source,
            })?;
        Ok(DeviceInfo {
            id: self.id.clone(),
            intrinsics,
            resolution,
            frame_interval: self.frame_interval(),
        })
    }
}

/// Open the adapter variant named by `config.kind` on its configured source.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(device = %config.id, kind = ?config.kind))
)]
pub fn open_device(config: &DeviceConfig) -> Result<Box<dyn DeviceAdapter + Send>, OpenError> {
    config.validate()?;
    let source = config.source.open().map_err(|e| OpenError::Unreachable {
        device: config.id.clone(),
        reason: e.to_string(),
    })?;
    let adapter: Box<dyn DeviceAdapter + Send> = match config.kind {
        DeviceKind::FixedRate => Box::new(FixedRateCamera::open(config, source)?),
        DeviceKind::Event => Box::new(EventCamera::open(config, source)?),
    };
    info!(
        "opened {:?} device `{}` at {} ({} fps)",
        config.kind,
        config.id,
        adapter.resolution(),
        config.fps
    );
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_config_with_defaults() {
        let json = r#"{
            "id": "event",
            "kind": "event",
            "source": {"type": "image_dir", "path": "rec/davis"},
            "intrinsics": {"format": "opencv_xml", "path": "davis.xml", "node": "DAVIS346_00000001"}
        }"#;
        let cfg: DeviceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kind, DeviceKind::Event);
        assert_eq!(cfg.fps, 30.0);
        assert!(cfg.pace);
        assert_eq!(cfg.queue_depth, 4);
        assert_eq!(cfg.expected_resolution, None);
        assert!(matches!(cfg.intrinsics, IntrinsicsConfig::OpencvXml { .. }));
    }

    #[test]
    fn parses_inline_intrinsics() {
        let json = r#"{
            "id": "depth",
            "kind": "fixed_rate",
            "fps": 15,
            "source": {"type": "image_dir", "path": "rec/zed"},
            "intrinsics": {"format": "inline",
                "camera_matrix": {"fx": 700.0, "fy": 700.0, "cx": 640.0, "cy": 360.0},
                "distortion": [-0.17, 0.02]},
            "expected_resolution": {"width": 1280, "height": 720}
        }"#;
        let cfg: DeviceConfig = serde_json::from_str(json).unwrap();
        let intr = cfg.intrinsics.load().unwrap();
        assert_eq!(intr.distortion, vec![-0.17, 0.02]);
        assert_eq!(cfg.frame_interval(), Duration::from_secs_f64(1.0 / 15.0));
    }

    #[test]
    fn zero_fps_is_invalid() {
        let cfg = DeviceConfig {
            id: CameraId::new("x"),
            kind: DeviceKind::FixedRate,
            fps: 0.0,
            source: SourceConfig::ImageDir {
                path: PathBuf::from("."),
            },
            intrinsics: IntrinsicsConfig::Json {
                path: PathBuf::from("k.json"),
            },
            expected_resolution: None,
            pace: false,
            queue_depth: 4,
        };
        assert!(matches!(
            cfg.validate(),
            Err(OpenError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn missing_recording_is_unreachable() {
        let cfg = DeviceConfig {
            id: CameraId::new("depth"),
            kind: DeviceKind::FixedRate,
            fps: 30.0,
            source: SourceConfig::ImageDir {
                path: PathBuf::from("/no/such/recording"),
            },
            intrinsics: IntrinsicsConfig::Json {
                path: PathBuf::from("k.json"),
            },
            expected_resolution: None,
            pace: false,
            queue_depth: 4,
        };
        assert!(matches!(
            open_device(&cfg),
            Err(OpenError::Unreachable { .. })
        ));
    }
}
