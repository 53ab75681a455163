//! Camera calibration files in OpenCV FileStorage JSON layout.
//!
//! ```json
//! {
//!   "camera_matrix": { "type_id": "opencv-matrix", "rows": 3, "cols": 3, "dt": "d",
//!                      "data": [800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0] },
//!   "distortion_coefficients": { "type_id": "opencv-matrix", "rows": 5, "cols": 1, "dt": "d",
//!                                "data": [-0.2, 0.05, 0.0, 0.0, 0.0] }
//! }
//! ```
//!
//! A tag may also hold a plain array, flat or nested by rows.

use nalgebra::Matrix3;
use planar_pose_core::{CameraIntrinsics, Distortion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const CAMERA_MATRIX_TAG: &str = "camera_matrix";
pub const DISTORTION_TAG: &str = "distortion_coefficients";

#[derive(thiserror::Error, Debug)]
pub enum CalibFileError {
    #[error("failed to access calibration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("calibration file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("calibration file has no `{0}` entry")]
    MissingTag(&'static str),
    #[error("`{tag}`: expected {expected}, got {actual}")]
    DimensionMismatch {
        tag: &'static str,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenCvMatrix {
    #[serde(default = "opencv_matrix_type")]
    type_id: String,
    rows: usize,
    cols: usize,
    #[serde(default = "double_type")]
    dt: String,
    data: Vec<f64>,
}

fn opencv_matrix_type() -> String {
    "opencv-matrix".to_string()
}

fn double_type() -> String {
    "d".to_string()
}

fn flatten(tag: &'static str, value: &Value, out: &mut Vec<f64>) -> Result<(), CalibFileError> {
    match value {
        Value::Number(n) => {
            out.push(n.as_f64().unwrap_or(f64::NAN));
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(|v| flatten(tag, v, out)),
        other => Err(CalibFileError::DimensionMismatch {
            tag,
            expected: "numbers".to_string(),
            actual: format!("{other}"),
        }),
    }
}

/// Values of a matrix tag in row-major order.
fn matrix_values(root: &Value, tag: &'static str) -> Result<Vec<f64>, CalibFileError> {
    let value = root.get(tag).ok_or(CalibFileError::MissingTag(tag))?;
    if value.is_object() {
        let m: OpenCvMatrix = serde_json::from_value(value.clone())?;
        if m.data.len() != m.rows * m.cols {
            return Err(CalibFileError::DimensionMismatch {
                tag,
                expected: format!("{}x{} = {} values", m.rows, m.cols, m.rows * m.cols),
                actual: format!("{} values", m.data.len()),
            });
        }
        return Ok(m.data);
    }
    let mut out = Vec::new();
    flatten(tag, value, &mut out)?;
    Ok(out)
}

/// Parse intrinsics from the JSON text of a calibration file.
pub fn parse_camera_parameters(text: &str) -> Result<CameraIntrinsics, CalibFileError> {
    let root: Value = serde_json::from_str(text)?;

    let k = matrix_values(&root, CAMERA_MATRIX_TAG)?;
    if k.len() != 9 {
        return Err(CalibFileError::DimensionMismatch {
            tag: CAMERA_MATRIX_TAG,
            expected: "3x3 matrix".to_string(),
            actual: format!("{} values", k.len()),
        });
    }
    let mat_k = Matrix3::from_row_slice(&k);

    let d = matrix_values(&root, DISTORTION_TAG)?;
    let distortion = Distortion::new(&d).map_err(|_| CalibFileError::DimensionMismatch {
        tag: DISTORTION_TAG,
        expected: "0, 4, 5 or 8 coefficients".to_string(),
        actual: format!("{} values", d.len()),
    })?;

    Ok(CameraIntrinsics::new(mat_k, distortion))
}

/// Read `camera_matrix` and `distortion_coefficients` from `path`.
pub fn load_camera_parameters(path: impl AsRef<Path>) -> Result<CameraIntrinsics, CalibFileError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| CalibFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let intrinsics = parse_camera_parameters(&text)?;
    log::info!(
        "loaded calibration from {}: K = {:?}, dist = {:?}",
        path.display(),
        intrinsics.mat_k.transpose().as_slice(),
        intrinsics.distortion.coefficients()
    );
    Ok(intrinsics)
}

/// Serialize intrinsics in the layout [`parse_camera_parameters`] reads.
pub fn camera_parameters_to_json(intrinsics: &CameraIntrinsics) -> Result<String, CalibFileError> {
    let k = intrinsics.mat_k.transpose();
    let coeffs = intrinsics.distortion.coefficients();
    let root = serde_json::json!({
        CAMERA_MATRIX_TAG: OpenCvMatrix {
            type_id: opencv_matrix_type(),
            rows: 3,
            cols: 3,
            dt: double_type(),
            data: k.as_slice().to_vec(),
        },
        DISTORTION_TAG: OpenCvMatrix {
            type_id: opencv_matrix_type(),
            rows: coeffs.len(),
            cols: 1,
            dt: double_type(),
            data: coeffs.to_vec(),
        },
    });
    Ok(serde_json::to_string_pretty(&root)?)
}

pub fn save_camera_parameters(
    path: impl AsRef<Path>,
    intrinsics: &CameraIntrinsics,
) -> Result<(), CalibFileError> {
    let path = path.as_ref();
    let json = camera_parameters_to_json(intrinsics)?;
    fs::write(path, json).map_err(|source| CalibFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const OPENCV_JSON: &str = r#"{
        "calibration_time": "2014-01-01",
        "camera_matrix": { "type_id": "opencv-matrix", "rows": 3, "cols": 3, "dt": "d",
            "data": [ 812.5, 0.0, 319.5, 0.0, 810.0, 239.5, 0.0, 0.0, 1.0 ] },
        "distortion_coefficients": { "type_id": "opencv-matrix", "rows": 5, "cols": 1, "dt": "d",
            "data": [ -0.21, 0.07, 0.001, -0.002, 0.0 ] }
    }"#;

    #[test]
    fn reads_opencv_matrices() {
        let cam = parse_camera_parameters(OPENCV_JSON).unwrap();
        assert_relative_eq!(cam.mat_k[(0, 0)], 812.5);
        assert_relative_eq!(cam.mat_k[(0, 2)], 319.5);
        assert_relative_eq!(cam.mat_k[(1, 1)], 810.0);
        assert_relative_eq!(cam.mat_k[(1, 2)], 239.5);
        assert_eq!(cam.distortion.coefficients(), &[-0.21, 0.07, 0.001, -0.002, 0.0]);
    }

    #[test]
    fn reads_nested_arrays() {
        let text = r#"{
            "camera_matrix": [[600, 0, 300], [0, 610, 200], [0, 0, 1]],
            "distortion_coefficients": [0.1, 0.0, 0.0, 0.0]
        }"#;
        let cam = parse_camera_parameters(text).unwrap();
        assert_relative_eq!(cam.mat_k[(1, 1)], 610.0);
        assert_eq!(cam.distortion.coefficients().len(), 4);
    }

    #[test]
    fn missing_tag_is_reported() {
        let text = r#"{ "camera_matrix": [[1, 0, 0], [0, 1, 0], [0, 0, 1]] }"#;
        assert!(matches!(
            parse_camera_parameters(text),
            Err(CalibFileError::MissingTag(DISTORTION_TAG))
        ));
    }

    #[test]
    fn wrong_shapes_are_reported() {
        let text = r#"{
            "camera_matrix": [[1, 0], [0, 1]],
            "distortion_coefficients": []
        }"#;
        assert!(matches!(
            parse_camera_parameters(text),
            Err(CalibFileError::DimensionMismatch { tag: CAMERA_MATRIX_TAG, .. })
        ));

        let text = r#"{
            "camera_matrix": [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
            "distortion_coefficients": [0.1, 0.2, 0.3]
        }"#;
        assert!(matches!(
            parse_camera_parameters(text),
            Err(CalibFileError::DimensionMismatch { tag: DISTORTION_TAG, .. })
        ));

        let text = r#"{
            "camera_matrix": { "rows": 3, "cols": 3, "data": [1, 0, 0] },
            "distortion_coefficients": []
        }"#;
        assert!(matches!(
            parse_camera_parameters(text),
            Err(CalibFileError::DimensionMismatch { tag: CAMERA_MATRIX_TAG, .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_camera_parameters("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, CalibFileError::Io { .. }));
    }

    #[test]
    fn save_then_load() {
        let cam = CameraIntrinsics::pinhole(700.0, 705.0, 330.0, 250.0)
            .with_distortion(Distortion::new(&[-0.1, 0.01, 0.0, 0.0, 0.002]).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.json");
        save_camera_parameters(&path, &cam).unwrap();
        let back = load_camera_parameters(&path).unwrap();
        assert_eq!(back, cam);
    }
}
