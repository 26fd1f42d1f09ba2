//! Calibration file: a named JSON archive of the stereo result.
//!
//! Keys follow the names downstream tools already read: `R`, `T`, `E`, `F`,
//! `cameraMatrix1`, `distCoeffs1`, `cameraMatrix2`, `distCoeffs2`,
//! `imageSize` (`[width, height]`), `reprojectionError` and `viewsUsed`.
//! Camera 1 is camera A. Matrices are row-major nested arrays.
//!
//! `distCoeffs1`/`distCoeffs2` always hold the five Brown-Conrady terms the
//! solver projected with. When a device supplied a different vector, it is
//! kept under `deviceDistCoeffs1`/`deviceDistCoeffs2` and restored on load.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use xcal_core::{CameraMatrix, DeviceIntrinsics, ImageSize};

use crate::result::CalibrationResult;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid calibration file: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalibrationFile {
    #[serde(rename = "R")]
    r: [[f64; 3]; 3],
    #[serde(rename = "T")]
    t: [f64; 3],
    #[serde(rename = "E")]
    e: [[f64; 3]; 3],
    #[serde(rename = "F")]
    f: [[f64; 3]; 3],
    camera_matrix1: [[f64; 3]; 3],
    dist_coeffs1: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_dist_coeffs1: Option<Vec<f64>>,
    camera_matrix2: [[f64; 3]; 3],
    dist_coeffs2: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_dist_coeffs2: Option<Vec<f64>>,
    image_size: [u32; 2],
    reprojection_error: f64,
    views_used: usize,
}

fn rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

fn from_rows(r: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| r[i][j])
}

/// The solver's five terms, plus the device vector when it differs.
fn split_distortion(intr: &DeviceIntrinsics) -> (Vec<f64>, Option<Vec<f64>>) {
    let model = intr.padded_distortion().to_vec();
    let device = (intr.distortion != model).then(|| intr.distortion.clone());
    (model, device)
}

impl From<&CalibrationResult> for CalibrationFile {
    fn from(c: &CalibrationResult) -> Self {
        let (dist_coeffs1, device_dist_coeffs1) = split_distortion(&c.intrinsics_a);
        let (dist_coeffs2, device_dist_coeffs2) = split_distortion(&c.intrinsics_b);
        Self {
            r: rows(&c.rotation),
            t: [c.translation.x, c.translation.y, c.translation.z],
            e: rows(&c.essential),
            f: rows(&c.fundamental),
            camera_matrix1: c.intrinsics_a.camera_matrix.to_array(),
            dist_coeffs1,
            device_dist_coeffs1,
            camera_matrix2: c.intrinsics_b.camera_matrix.to_array(),
            dist_coeffs2,
            device_dist_coeffs2,
            image_size: [c.image_size.width, c.image_size.height],
            reprojection_error: c.rms_error,
            views_used: c.views_used,
        }
    }
}

fn camera_matrix(name: &str, k: [[f64; 3]; 3]) -> Result<CameraMatrix, StoreError> {
    if k[0][1] != 0.0 || k[1][0] != 0.0 || k[2] != [0.0, 0.0, 1.0] {
        return Err(StoreError::Invalid(format!(
            "{name} is not an upper-triangular camera matrix without skew"
        )));
    }
    Ok(CameraMatrix::from_array(k))
}

impl TryFrom<CalibrationFile> for CalibrationResult {
    type Error = StoreError;

    fn try_from(file: CalibrationFile) -> Result<Self, StoreError> {
        let all_finite = file
            .r
            .iter()
            .chain(&file.e)
            .chain(&file.f)
            .flatten()
            .chain(&file.t)
            .all(|v| v.is_finite());
        if !all_finite || !file.reprojection_error.is_finite() {
            return Err(StoreError::Invalid("non-finite value".into()));
        }

        let rotation = from_rows(&file.r);
        let orthogonality = (rotation.transpose() * rotation - Matrix3::identity()).amax();
        if orthogonality > 1e-6 || rotation.determinant() < 0.0 {
            return Err(StoreError::Invalid("R is not a rotation".into()));
        }

        let invalid = |e: xcal_core::IntrinsicsError| StoreError::Invalid(e.to_string());
        let intrinsics_a = DeviceIntrinsics::new(
            camera_matrix("cameraMatrix1", file.camera_matrix1)?,
            file.device_dist_coeffs1.unwrap_or(file.dist_coeffs1),
        )
        .map_err(invalid)?;
        let intrinsics_b = DeviceIntrinsics::new(
            camera_matrix("cameraMatrix2", file.camera_matrix2)?,
            file.device_dist_coeffs2.unwrap_or(file.dist_coeffs2),
        )
        .map_err(invalid)?;

        Ok(CalibrationResult {
            rotation,
            translation: Vector3::from(file.t),
            essential: from_rows(&file.e),
            fundamental: from_rows(&file.f),
            rms_error: file.reprojection_error,
            intrinsics_a,
            intrinsics_b,
            image_size: ImageSize::new(file.image_size[0], file.image_size[1]),
            views_used: file.views_used,
        })
    }
}

/// Write `result` to `path`, replacing any previous file in one step.
///
/// The archive is written to a temporary file next to `path` and renamed
/// into place, so a failed write leaves the old file (if any) intact.
pub fn save(result: &CalibrationResult, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, &CalibrationFile::from(result))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    info!("saved calibration to {}", path.display());
    Ok(())
}

/// Read a calibration file written by [`save`] (or by any tool using the
/// same keys).
pub fn load(path: impl AsRef<Path>) -> Result<CalibrationResult, StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let file: CalibrationFile = serde_json::from_reader(reader)?;
    CalibrationResult::try_from(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{essential_matrix, fundamental_matrix};
    use nalgebra::Rotation3;

    fn sample() -> CalibrationResult {
        let k_a = CameraMatrix {
            fx: 346.1234567890123,
            fy: 345.9,
            cx: 173.3,
            cy: 130.1,
        };
        let k_b = CameraMatrix {
            fx: 612.0 / 3.0,
            fy: 611.5,
            cx: 319.77,
            cy: 241.03,
        };
        let rotation = *Rotation3::from_euler_angles(0.013, -0.2, 0.1 / 3.0).matrix();
        let translation = Vector3::new(-0.0731, 0.1 / 7.0, 0.004);
        let essential = essential_matrix(&rotation, &translation);
        let fundamental =
            fundamental_matrix(&essential, &k_a.to_matrix(), &k_b.to_matrix()).unwrap();
        CalibrationResult {
            rotation,
            translation,
            essential,
            fundamental,
            rms_error: 0.2718281828,
            intrinsics_a: DeviceIntrinsics::new(k_a, vec![-0.3, 0.1, 1e-4]).unwrap(),
            intrinsics_b: DeviceIntrinsics::new(k_b, vec![0.0; 5]).unwrap(),
            image_size: ImageSize::new(346, 260),
            views_used: 20,
        }
    }

    #[test]
    fn save_then_load_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.json");
        let r = sample();
        save(&r, &path).unwrap();
        assert_eq!(load(&path).unwrap(), r);
    }

    #[test]
    fn uses_archive_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stereo.json");
        save(&sample(), &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        for key in [
            "R",
            "T",
            "E",
            "F",
            "cameraMatrix1",
            "distCoeffs1",
            "cameraMatrix2",
            "distCoeffs2",
            "imageSize",
            "reprojectionError",
            "viewsUsed",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["imageSize"], serde_json::json!([346, 260]));
        assert_eq!(value["distCoeffs1"], serde_json::json!([-0.3, 0.1, 1e-4, 0.0, 0.0]));
        assert_eq!(value["deviceDistCoeffs1"], serde_json::json!([-0.3, 0.1, 1e-4]));
        assert!(value.get("deviceDistCoeffs2").is_none());
    }

    #[test]
    fn long_distortion_stores_the_solver_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.json");
        let mut r = sample();
        let eight = vec![-0.3, 0.1, 1e-4, -2e-4, 0.01, 0.02, -0.003, 0.004];
        r.intrinsics_b = DeviceIntrinsics::new(r.intrinsics_b.camera_matrix, eight.clone()).unwrap();
        save(&r, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["distCoeffs2"], serde_json::json!(&eight[..5]));
        assert_eq!(value["deviceDistCoeffs2"], serde_json::json!(eight));
        assert_eq!(load(&path).unwrap(), r);
    }

    #[test]
    fn five_term_file_without_device_key_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.json");
        save(&sample(), &path).unwrap();
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("deviceDistCoeffs1");
        fs::write(&path, value.to_string()).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.intrinsics_a.distortion, vec![-0.3, 0.1, 1e-4, 0.0, 0.0]);
        assert_eq!(
            loaded.intrinsics_a.padded_distortion(),
            sample().intrinsics_a.padded_distortion()
        );
    }

    #[test]
    fn overwrite_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.json");
        fs::write(&path, "stale").unwrap();
        save(&sample(), &path).unwrap();
        assert!(load(&path).is_ok());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn rejects_non_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.json");
        let mut r = sample();
        r.rotation[(0, 0)] = 2.0;
        save(&r, &path).unwrap();
        assert!(matches!(load(&path), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn missing_key_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.json");
        fs::write(&path, r#"{"R": [[1,0,0],[0,1,0],[0,0,1]]}"#).unwrap();
        assert!(matches!(load(&path), Err(StoreError::Json(_))));
    }
}
