use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{GrayImage, ImageSize, Timestamp};

/// Name of a device within a session, e.g. `"event"` or `"depth"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One grayscale frame as delivered by a device adapter.
#[derive(Clone, Debug)]
pub struct FrameSample {
    pub camera: CameraId,
    pub image: GrayImage,
    pub timestamp: Timestamp,
    /// Per-adapter frame counter starting at zero.
    pub sequence: u64,
}

impl FrameSample {
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.image.width as u32, self.image.height as u32)
    }
}
