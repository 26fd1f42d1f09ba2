use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nalgebra::{Isometry3, Point2, Rotation3, Translation3, UnitQuaternion, Vector3};
use xcal::capture::{control_channel, AccumulatorParams, FinishReason, SchedulerParams};
use xcal::core::{CameraId, CameraMatrix, DeviceIntrinsics, ImageSize, TargetGeometry};
use xcal::detect::synthetic::render_circle_grid;
use xcal::detect::{CircleGridParams, CirclePolarity};
use xcal::device::{DeviceConfig, DeviceKind, IntrinsicsConfig, SourceConfig};
use xcal::session::{run_session, ConfigError, SessionConfig, SessionError};
use xcal::solve::{store, PinholeCamera, SolveError, SolverParams};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn intrinsics_a() -> DeviceIntrinsics {
    DeviceIntrinsics::new(
        CameraMatrix {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        },
        vec![0.0; 5],
    )
    .unwrap()
}

fn intrinsics_b() -> DeviceIntrinsics {
    DeviceIntrinsics::new(
        CameraMatrix {
            fx: 520.0,
            fy: 518.0,
            cx: 318.0,
            cy: 242.0,
        },
        vec![-0.05, 0.01, 0.0, 0.0],
    )
    .unwrap()
}

fn rig_rotation() -> Rotation3<f64> {
    Rotation3::from_euler_angles(0.005, -0.03, 0.004)
}

fn rig_translation() -> Vector3<f64> {
    Vector3::new(-0.07, 0.002, 0.001)
}

fn geometry() -> TargetGeometry {
    TargetGeometry::new(4, 5, 0.04).unwrap()
}

fn target_pose(i: usize) -> Isometry3<f64> {
    let s = i as f64;
    Isometry3::from_parts(
        Translation3::new(
            -0.08 + 0.02 * (s * 0.7).sin(),
            -0.06 + 0.015 * (s * 1.3).cos(),
            0.55 + 0.01 * s,
        ),
        UnitQuaternion::from_euler_angles(
            0.25 * (s * 0.9).sin(),
            0.25 * (s * 0.5).cos(),
            0.08 * (s * 1.7).sin(),
        ),
    )
}

fn save_png(img: &xcal::core::GrayImage, path: &Path) {
    image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .unwrap()
        .save(path)
        .unwrap();
}

/// Render `views` target poses as seen by both cameras into two directories.
fn record(views: usize, dir_a: &Path, dir_b: &Path) {
    let object = geometry().object_points();
    let cam_a = PinholeCamera::from_intrinsics(&intrinsics_a());
    let cam_b = PinholeCamera::from_intrinsics(&intrinsics_b());
    let rig = Isometry3::from_parts(
        Translation3::from(rig_translation()),
        UnitQuaternion::from_rotation_matrix(&rig_rotation()),
    );

    for v in 0..views {
        let pose = target_pose(v);
        let a: Vec<Point2<f64>> = object.iter().map(|p| cam_a.project(&(pose * p))).collect();
        let b: Vec<Point2<f64>> = object
            .iter()
            .map(|p| cam_b.project(&(rig * pose * p)))
            .collect();
        let img_a = render_circle_grid(WIDTH as usize, HEIGHT as usize, &a, 7.0, CirclePolarity::Dark);
        let img_b = render_circle_grid(WIDTH as usize, HEIGHT as usize, &b, 7.0, CirclePolarity::Dark);
        save_png(&img_a, &dir_a.join(format!("frame_{v:03}.png")));
        save_png(&img_b, &dir_b.join(format!("frame_{v:03}.png")));
    }
}

fn device(id: &str, kind: DeviceKind, dir: &Path, intrinsics: DeviceIntrinsics) -> DeviceConfig {
    DeviceConfig {
        id: CameraId::new(id),
        kind,
        fps: 30.0,
        source: SourceConfig::ImageDir {
            path: dir.to_path_buf(),
        },
        intrinsics: IntrinsicsConfig::Inline(intrinsics),
        expected_resolution: Some(ImageSize::new(WIDTH, HEIGHT)),
        pace: false,
        queue_depth: 2,
    }
}

fn session(dir_a: &Path, dir_b: &Path, output: &Path) -> SessionConfig {
    SessionConfig {
        camera_a: device("event", DeviceKind::Event, dir_a, intrinsics_a()),
        camera_b: device("depth", DeviceKind::FixedRate, dir_b, intrinsics_b()),
        target: geometry(),
        detector: CircleGridParams::default(),
        accumulator: AccumulatorParams { target_views: 12 },
        scheduler: SchedulerParams {
            poll_interval_ms: 1,
            pairing_window_ms: Some(5_000),
            max_skew_ms: 1_000,
        },
        solver: SolverParams {
            min_views: 10,
            ..SolverParams::default()
        },
        output_path: output.to_path_buf(),
    }
}

#[test]
fn recorded_session_recovers_the_rig_and_writes_the_file() {
    init_logger();
    let root = tempfile::tempdir().unwrap();
    let (dir_a, dir_b) = (root.path().join("event"), root.path().join("depth"));
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();
    record(20, &dir_a, &dir_b);
    let output = root.path().join("out").join("calibration.json");
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();
    let config = session(&dir_a, &dir_b, &output);

    let (operator, control) = control_channel();
    let done = Arc::new(AtomicBool::new(false));
    let spam = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                operator.confirm();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    let outcome = run_session(&config, control);
    done.store(true, Ordering::Relaxed);
    spam.join().unwrap();
    let outcome = outcome.unwrap();

    assert_eq!(outcome.finish, FinishReason::Complete);
    let result = &outcome.result;
    assert_eq!(result.views_used, 12);
    assert_eq!(result.image_size, ImageSize::new(WIDTH, HEIGHT));
    assert_eq!(result.intrinsics_a, intrinsics_a());
    assert_eq!(result.intrinsics_b, intrinsics_b());
    assert!(
        (result.rotation - rig_rotation().matrix()).amax() < 5e-3,
        "R = {}",
        result.rotation
    );
    assert!(
        (result.translation - rig_translation()).norm() < 5e-3,
        "T = {}",
        result.translation
    );
    assert!(result.rms_error < 0.5, "rms {}", result.rms_error);

    let stored = store::load(&output).unwrap();
    assert_eq!(&stored, result);
}

#[test]
fn mismatched_resolutions_fail_before_capture() {
    let root = tempfile::tempdir().unwrap();
    let (dir_a, dir_b) = (root.path().join("event"), root.path().join("depth"));
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();
    image::GrayImage::from_pixel(64, 48, image::Luma([255]))
        .save(dir_a.join("0.png"))
        .unwrap();
    image::GrayImage::from_pixel(32, 24, image::Luma([255]))
        .save(dir_b.join("0.png"))
        .unwrap();
    let output = root.path().join("calibration.json");
    let mut config = session(&dir_a, &dir_b, &output);
    config.camera_a.expected_resolution = None;
    config.camera_b.expected_resolution = None;

    let (_operator, control) = control_channel();
    match run_session(&config, control) {
        Err(SessionError::ResolutionMismatch { a, b }) => {
            assert_eq!(a, ImageSize::new(64, 48));
            assert_eq!(b, ImageSize::new(32, 24));
        }
        other => panic!("expected a resolution mismatch, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn stop_aborts_without_writing() {
    let root = tempfile::tempdir().unwrap();
    let (dir_a, dir_b) = (root.path().join("event"), root.path().join("depth"));
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();
    record(2, &dir_a, &dir_b);
    let output = root.path().join("calibration.json");
    let config = session(&dir_a, &dir_b, &output);

    let (operator, control) = control_channel();
    operator.stop();
    match run_session(&config, control) {
        Err(SessionError::Aborted { views }) => assert_eq!(views, 0),
        other => panic!("expected an abort, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn short_recording_fails_to_solve_and_hands_back_the_views() {
    let root = tempfile::tempdir().unwrap();
    let (dir_a, dir_b) = (root.path().join("event"), root.path().join("depth"));
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();
    record(3, &dir_a, &dir_b);
    let output = root.path().join("calibration.json");
    let config = session(&dir_a, &dir_b, &output);

    let (operator, control) = control_channel();
    let done = Arc::new(AtomicBool::new(false));
    let spam = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                operator.confirm();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    let outcome = run_session(&config, control);
    done.store(true, Ordering::Relaxed);
    spam.join().unwrap();

    match outcome {
        Err(SessionError::Solve {
            source,
            correspondences,
        }) => {
            let have = correspondences.view_count();
            assert!(have <= 3);
            assert_eq!(source, SolveError::InsufficientViews { have, need: 10 });
        }
        other => panic!("expected a solve failure, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn config_rejects_too_few_target_views() {
    let mut config = session(Path::new("a"), Path::new("b"), Path::new("out.json"));
    config.accumulator.target_views = 5;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = session(Path::new("a"), Path::new("b"), Path::new("out.json"));
    config.camera_b.id = CameraId::new("event");
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn config_file_fills_in_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let json = r#"{
        "camera_a": {
            "id": "event",
            "kind": "event",
            "source": { "type": "image_dir", "path": "rec/event" },
            "intrinsics": { "format": "opencv_xml", "path": "davis.xml", "node": "DAVIS346" }
        },
        "camera_b": {
            "id": "depth",
            "kind": "fixed_rate",
            "fps": 15,
            "source": { "type": "image_dir", "path": "rec/depth" },
            "intrinsics": { "format": "json", "path": "depth.json" }
        },
        "target": { "rows": 4, "cols": 11, "spacing": 0.02 },
        "output_path": "calibration.json"
    }"#;
    std::fs::write(&path, json).unwrap();

    let config = SessionConfig::load(&path).unwrap();
    assert_eq!(config.camera_b.fps, 15.0);
    assert!(config.camera_a.pace);
    assert_eq!(config.accumulator, AccumulatorParams::default());
    assert_eq!(config.scheduler, SchedulerParams::default());
    assert_eq!(config.solver, SolverParams::default());
    assert_eq!(config.target.point_count(), 44);
}
