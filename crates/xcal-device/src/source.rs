//! Driver boundary: where frames come from.
//!
//! A [`FrameSource`] stands in for a vendor SDK handle. Adapters add pacing,
//! timestamps and queueing on top of it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::debug;
use xcal_core::{GrayImage, ImageSize};

/// One decoded frame with the device's own timestamp if it carries one.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub image: GrayImage,
    pub device_time_ns: Option<i64>,
}

impl RawFrame {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            device_time_ns: None,
        }
    }

    pub fn with_device_time(image: GrayImage, nanos: i64) -> Self {
        Self {
            image,
            device_time_ns: Some(nanos),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no frames found in {0}")]
    Empty(PathBuf),
    #[error("frame {path} is {actual}, stream is {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: ImageSize,
        actual: ImageSize,
    },
}

pub trait FrameSource {
    fn resolution(&self) -> ImageSize;

    /// Next frame in capture order, `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn resolution(&self) -> ImageSize {
        (**self).resolution()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
        (**self).next_frame()
    }
}

/// Frames held in memory, played back once.
#[derive(Clone, Debug)]
pub struct MemorySource {
    resolution: ImageSize,
    frames: VecDeque<RawFrame>,
}

impl MemorySource {
    pub fn new(resolution: ImageSize, frames: Vec<RawFrame>) -> Self {
        Self {
            resolution,
            frames: frames.into(),
        }
    }

    /// Resolution is taken from the first image.
    pub fn from_images(images: Vec<GrayImage>) -> Result<Self, SourceError> {
        let first = images
            .first()
            .ok_or_else(|| SourceError::Empty(PathBuf::from("<memory>")))?;
        let resolution = ImageSize::new(first.width as u32, first.height as u32);
        Ok(Self::new(
            resolution,
            images.into_iter().map(RawFrame::new).collect(),
        ))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn resolution(&self) -> ImageSize {
        self.resolution
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
        Ok(self.frames.pop_front())
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm"];

/// Recorded frames in a directory, played back in file-name order.
///
/// A file whose stem is an integer (`1699999999123456789.png`) is taken to be
/// named after its capture time in nanoseconds and that value becomes the
/// frame's device time.
#[derive(Clone, Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    resolution: ImageSize,
    paths: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();

        let first = paths.first().ok_or_else(|| SourceError::Empty(dir.clone()))?;
        let (width, height) =
            image::image_dimensions(first).map_err(|source| SourceError::Decode {
                path: first.clone(),
                source,
            })?;
        debug!(
            "image sequence {}: {} frames at {}x{}",
            dir.display(),
            paths.len(),
            width,
            height
        );

        Ok(Self {
            dir,
            resolution: ImageSize::new(width, height),
            paths: paths.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn resolution(&self) -> ImageSize {
        self.resolution
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let decoded = image::open(&path)
            .map_err(|source| SourceError::Decode {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        let actual = ImageSize::new(decoded.width(), decoded.height());
        if actual != self.resolution {
            return Err(SourceError::SizeMismatch {
                path,
                expected: self.resolution,
                actual,
            });
        }
        let image = GrayImage {
            width: actual.width as usize,
            height: actual.height as usize,
            data: decoded.into_raw(),
        };
        let device_time_ns = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<i64>().ok());
        Ok(Some(RawFrame {
            image,
            device_time_ns,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32, value: u8) {
        image::GrayImage::from_pixel(w, h, image::Luma([value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn plays_directory_in_name_order_with_stem_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("2000.png"), 8, 6, 20);
        write_png(&dir.path().join("1000.png"), 8, 6, 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut src = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(src.resolution(), ImageSize::new(8, 6));
        assert_eq!(src.remaining(), 2);

        let first = src.next_frame().unwrap().unwrap();
        assert_eq!(first.device_time_ns, Some(1000));
        assert_eq!(first.image.get(0, 0), 10);
        let second = src.next_frame().unwrap().unwrap();
        assert_eq!(second.device_time_ns, Some(2000));
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path()),
            Err(SourceError::Empty(_))
        ));
    }

    #[test]
    fn size_change_mid_stream_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 8, 6, 0);
        write_png(&dir.path().join("b.png"), 6, 6, 0);
        let mut src = ImageSequenceSource::open(dir.path()).unwrap();
        let first = src.next_frame().unwrap().unwrap();
        assert_eq!(first.device_time_ns, None);
        assert!(matches!(
            src.next_frame(),
            Err(SourceError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn memory_source_takes_resolution_from_first_image() {
        let mut src = MemorySource::from_images(vec![GrayImage::filled(4, 3, 0)]).unwrap();
        assert_eq!(src.resolution(), ImageSize::new(4, 3));
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_none());
        assert!(MemorySource::from_images(Vec::new()).is_err());
    }
}
