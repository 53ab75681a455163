use nalgebra::{Matrix3, Point2, Point3, Vector3};
use planar_pose::core::synthetic::{render_pattern, RenderOptions};
use planar_pose::core::{decompose_homography, Homography};
use planar_pose::detect::{BlobGridFinder, BoardSize, CircleGridMode, PatternFinder};
use planar_pose::{
    default_finder, load_camera_parameters, save_camera_parameters, CameraIntrinsics, Frame, FrameView,
    PatternKind, PatternSpec, PlanarTracker, Pose, TrackerConfig,
};

const W: usize = 640;
const H: usize = 480;

fn camera() -> CameraIntrinsics {
    CameraIntrinsics::pinhole(800.0, 800.0, 320.0, 240.0)
}

/// Fronto-parallel pose placing the pattern centre on the optical axis.
fn fronto_parallel(spec: &PatternSpec, depth: f64) -> Pose {
    let (ex, ey) = spec.extent();
    Pose::from_parts(Matrix3::identity(), Vector3::new(-ex / 2.0, -ey / 2.0, depth))
}

fn plane_homography(cam: &CameraIntrinsics, pose: &Pose) -> Homography {
    let r = pose.rotation();
    let cols = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), pose.translation()]);
    Homography::new(cam.mat_k * cols)
}

fn render(spec: &PatternSpec, cam: &CameraIntrinsics, pose: &Pose) -> Frame {
    let h = plane_homography(cam, pose);
    Frame::from(render_pattern(spec, &h, W, H, &RenderOptions::default()).unwrap())
}

/// Reports the true corners shifted by a fixed offset, leaving the rest to
/// sub-pixel refinement.
struct RoughCorners(Vec<Point2<f64>>);

impl PatternFinder for RoughCorners {
    fn find_chessboard_corners(&self, _: &Frame, _: BoardSize) -> Option<Vec<Point2<f64>>> {
        Some(self.0.iter().map(|p| p + nalgebra::Vector2::new(0.7, -0.6)).collect())
    }

    fn find_circles_grid(&self, _: &Frame, _: BoardSize, _: CircleGridMode) -> Option<Vec<Point2<f64>>> {
        None
    }
}

#[test]
fn checkerboard_9x6_fronto_parallel_homography_pose() {
    let spec = PatternSpec::new(PatternKind::Checkerboard, 9, 6, 25.0).unwrap();
    let cam = camera();
    let truth = fronto_parallel(&spec, 1000.0);
    let frame = render(&spec, &cam, &truth);
    let corners = cam.project(&spec.points_3d(), &truth);

    let mut cfg = TrackerConfig::with_pattern(spec);
    cfg.homography.seed = Some(7);
    let tracker = PlanarTracker::new(cfg, RoughCorners(corners.clone()));

    let detection = tracker.detect(&frame);
    assert!(detection.found);
    for (p, q) in detection.points.iter().zip(&corners) {
        assert!((p - q).norm() < 0.2, "refined {p:?} vs true {q:?}");
    }

    let hp = tracker.homography_pose(&frame, &cam).unwrap();
    let pose = hp.pose.unwrap();
    assert!((pose.rotation() - Matrix3::identity()).norm() < 0.02);
    let dt = pose.translation() - truth.translation();
    assert!(dt.x.abs() < 2.0 && dt.y.abs() < 2.0, "{dt:?}");
    assert!(dt.z.abs() < 20.0, "{dt:?}");

    // With an identity calibration matrix the rotation is still the identity
    // for a square-pixel camera, and the pattern stays in front.
    let h = hp.homography.unwrap();
    let naive = decompose_homography(&h, &Matrix3::identity()).unwrap();
    assert!(naive.translation().z > 0.0);
    assert!((naive.rotation() - Matrix3::identity()).norm() < 0.02);
}

#[test]
fn circle_grid_is_tracked_from_pixels() {
    let spec = PatternSpec::new(PatternKind::SymmetricCircleGrid, 7, 5, 25.0).unwrap();
    let cam = camera();
    let truth = Pose::from_rvec_tvec(Vector3::new(0.15, -0.1, 0.05), Vector3::new(-75.0, -50.0, 900.0));
    let frame = render(&spec, &cam, &truth);

    let mut cfg = TrackerConfig::with_pattern(spec);
    cfg.pnp.seed = Some(3);
    let finder = BlobGridFinder::new(cfg.blobs.clone());
    let tracker = PlanarTracker::new(cfg, finder);

    let out = tracker.track(&frame, &cam, FrameView::Raw).unwrap();
    assert!(out.detection.found);
    let est = out.estimate.unwrap();
    assert_eq!(est.inliers.len(), 35);
    assert!(est.rms_error < 0.5, "rms {}", est.rms_error);
    let dt = est.pose.translation() - truth.translation();
    assert!(dt.norm() < 15.0, "{dt:?}");

    let axes = out.axes.unwrap();
    let origin = cam.project(&[Point3::origin()], &truth)[0];
    assert!((axes.origin - origin).norm() < 1.0);
}

#[test]
fn rectified_circle_grid_lands_on_pattern_coordinates() {
    let spec = PatternSpec::new(PatternKind::SymmetricCircleGrid, 7, 5, 25.0).unwrap();
    let cam = camera();
    let truth = Pose::from_rvec_tvec(Vector3::new(0.2, 0.1, 0.0), Vector3::new(-75.0, -50.0, 800.0));
    let frame = render(&spec, &cam, &truth);

    let mut cfg = TrackerConfig::with_pattern(spec);
    cfg.homography.seed = Some(5);
    let finder = BlobGridFinder::new(cfg.blobs.clone());
    let tracker = PlanarTracker::new(cfg, finder);

    let out = tracker.rectify(&frame).unwrap();
    assert!(out.detection.found);
    let gray = out.rectified.to_gray();
    // Circle centre versus the gap between four circles.
    assert!(gray.get(50, 50) < 100, "centre {}", gray.get(50, 50));
    assert!(gray.get(62, 62) > 150, "gap {}", gray.get(62, 62));
}

#[test]
fn calibration_file_feeds_the_tracker() {
    let spec = PatternSpec::new(PatternKind::SymmetricCircleGrid, 7, 5, 25.0).unwrap();
    let cam = camera();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.json");
    save_camera_parameters(&path, &cam).unwrap();
    let loaded = load_camera_parameters(&path).unwrap();
    assert_eq!(loaded, cam);

    let truth = fronto_parallel(&spec, 900.0);
    let frame = render(&spec, &cam, &truth);
    let mut cfg = TrackerConfig::with_pattern(spec);
    cfg.pnp.seed = Some(9);
    let tracker = PlanarTracker::new(cfg.clone(), BlobGridFinder::new(cfg.blobs));
    let out = tracker.track(&frame, &loaded, FrameView::Raw).unwrap();
    let z = out.estimate.unwrap().pose.translation().z;
    assert!((z - 900.0).abs() < 15.0, "z = {z}");
}

#[cfg(feature = "chess")]
#[test]
fn default_finder_detects_and_tracks_checkerboard() {
    let spec = PatternSpec::new(PatternKind::Checkerboard, 9, 6, 25.0).unwrap();
    let cam = camera();
    let truth = fronto_parallel(&spec, 1000.0);
    let frame = render(&spec, &cam, &truth);
    let corners = cam.project(&spec.points_3d(), &truth);

    let mut cfg = TrackerConfig::with_pattern(spec);
    cfg.pnp.seed = Some(11);
    let tracker = PlanarTracker::new(cfg.clone(), default_finder(&cfg));

    let detection = tracker.detect(&frame);
    assert!(detection.found);
    assert_eq!(detection.points.len(), 54);
    for (p, q) in detection.points.iter().zip(&corners) {
        assert!((p - q).norm() < 0.3, "{p:?} vs {q:?}");
    }

    let out = tracker.track(&frame, &cam, FrameView::Raw).unwrap();
    let dt = out.estimate.unwrap().pose.translation() - truth.translation();
    assert!(dt.norm() < 15.0, "{dt:?}");
}
