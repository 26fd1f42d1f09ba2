//! Intrinsics files: plain JSON and OpenCV `FileStorage` XML.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use xcal_core::{
    load_json, write_json, CameraMatrix, DeviceIntrinsics, ImageSize, IntrinsicsError, JsonIoError,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum IntrinsicsLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] JsonIoError),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error("node `{0}` not found")]
    MissingNode(String),
    #[error("node `{node}` has no `{name}` matrix")]
    MissingMatrix { node: String, name: String },
    #[error("matrix `{name}`: {reason}")]
    BadMatrix { name: String, reason: String },
    #[error(transparent)]
    Invalid(#[from] IntrinsicsError),
}

/// JSON layout of an intrinsics file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsFile {
    /// Row-major 3x3 camera matrix.
    pub camera_matrix: [[f64; 3]; 3],
    #[serde(default)]
    pub distortion_coefficients: Vec<f64>,
    #[serde(default)]
    pub image_size: Option<ImageSize>,
}

impl IntrinsicsFile {
    pub fn from_intrinsics(intrinsics: &DeviceIntrinsics, image_size: Option<ImageSize>) -> Self {
        Self {
            camera_matrix: intrinsics.camera_matrix.to_array(),
            distortion_coefficients: intrinsics.distortion.clone(),
            image_size,
        }
    }

    pub fn to_intrinsics(&self) -> Result<DeviceIntrinsics, IntrinsicsError> {
        DeviceIntrinsics::new(
            CameraMatrix::from_array(self.camera_matrix),
            self.distortion_coefficients.clone(),
        )
    }
}

pub fn load_intrinsics_json(path: impl AsRef<Path>) -> Result<DeviceIntrinsics, IntrinsicsLoadError> {
    let file: IntrinsicsFile = load_json(path)?;
    Ok(file.to_intrinsics()?)
}

pub fn write_intrinsics_json(
    intrinsics: &DeviceIntrinsics,
    image_size: Option<ImageSize>,
    path: impl AsRef<Path>,
) -> Result<(), IntrinsicsLoadError> {
    write_json(&IntrinsicsFile::from_intrinsics(intrinsics, image_size), path)?;
    Ok(())
}

#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(path)))]
pub fn load_opencv_xml(
    path: impl AsRef<Path>,
    node: &str,
) -> Result<DeviceIntrinsics, IntrinsicsLoadError> {
    let xml = std::fs::read_to_string(path)?;
    parse_opencv_xml(&xml, node)
}

/// Read `camera_matrix` and `distortion_coefficients` below the top-level
/// element `node` of an OpenCV storage document:
///
/// ```text
/// <opencv_storage>
///   <NODE>
///     <camera_matrix type_id="opencv-matrix"> ... <data>fx 0 cx 0 fy cy 0 0 1</data>
///     <distortion_coefficients type_id="opencv-matrix"> ... <data>k1 k2 p1 p2 k3</data>
/// ```
pub fn parse_opencv_xml(xml: &str, node: &str) -> Result<DeviceIntrinsics, IntrinsicsLoadError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut node_seen = false;
    let mut data: HashMap<String, String> = HashMap::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if path.len() == 1 && name == node {
                    node_seen = true;
                }
                path.push(name);
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                if path.len() == 4 && path[1] == node && path[3] == "data" {
                    let text: Cow<'_, str> = t.unescape()?;
                    let slot = data.entry(path[2].clone()).or_default();
                    slot.push(' ');
                    slot.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !node_seen {
        return Err(IntrinsicsLoadError::MissingNode(node.to_string()));
    }
    let matrix = |name: &str| -> Result<Vec<f64>, IntrinsicsLoadError> {
        let raw = data
            .get(name)
            .ok_or_else(|| IntrinsicsLoadError::MissingMatrix {
                node: node.to_string(),
                name: name.to_string(),
            })?;
        raw.split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|e| IntrinsicsLoadError::BadMatrix {
                    name: name.to_string(),
                    reason: format!("`{tok}`: {e}"),
                })
            })
            .collect()
    };

    let k = matrix("camera_matrix")?;
    if k.len() != 9 {
        return Err(IntrinsicsLoadError::BadMatrix {
            name: "camera_matrix".to_string(),
            reason: format!("expected 9 values, found {}", k.len()),
        });
    }
    let distortion = matrix("distortion_coefficients")?;
    let camera_matrix = CameraMatrix::from_array([[k[0], k[1], k[2]], [k[3], k[4], k[5]], [k[6], k[7], k[8]]]);
    Ok(DeviceIntrinsics::new(camera_matrix, distortion)?)
}
