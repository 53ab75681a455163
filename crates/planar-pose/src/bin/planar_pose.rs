use std::error::Error;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use planar_pose::frames::{write_frame, FrameSource, ImageSequence};
use planar_pose::{
    default_finder, load_camera_parameters, undistort_view, CameraIntrinsics, DefaultFinder,
    Frame, FrameView, PatternKind, PatternSpec, PlanarTracker, TrackError, TrackerConfig,
    UndistortMode,
};
use serde_json::{json, Value};

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

/// Planar calibration-pattern tracking over image sequences.
#[derive(Debug, Parser)]
#[command(name = "planar-pose", author, version, about)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON (only with the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect the pattern and warp each frame to a fronto-parallel view.
    Rectify(RectifyArgs),
    /// Remove lens distortion, or show what it changes.
    Undistort(UndistortArgs),
    /// Robust PnP pose and reference-axis end points per frame.
    Track(TrackArgs),
    /// Pose from the decomposed pattern-to-image homography per frame.
    HomographyPose(TrackArgs),
}

#[derive(Debug, Args)]
struct PatternArgs {
    /// Points per pattern row (inner corners or circles).
    #[arg(short = 'w', long = "width")]
    width: Option<u32>,

    /// Points per pattern column.
    #[arg(short = 'h', long = "height")]
    height: Option<u32>,

    /// Pattern type: chess, circles or acircles.
    #[arg(long = "pt", value_name = "TYPE")]
    pattern: Option<PatternKind>,

    /// Spacing between neighbouring pattern points.
    #[arg(long)]
    square_size: Option<f64>,

    /// Tracker configuration JSON; flags override its pattern.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Debug, Args)]
#[command(disable_help_flag = true)]
struct RectifyArgs {
    #[command(flatten)]
    pattern: PatternArgs,

    /// Write rectified frames here.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Image files or directories of images.
    #[arg(required = true)]
    frames: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct UndistortArgs {
    /// Calibration file (OpenCV FileStorage JSON).
    #[arg(short = 'c', long = "calib")]
    calib: PathBuf,

    /// original, undistorted or difference.
    #[arg(long, default_value = "undistorted")]
    mode: UndistortMode,

    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(required = true)]
    frames: Vec<PathBuf>,
}

#[derive(Debug, Args)]
#[command(disable_help_flag = true)]
struct TrackArgs {
    #[command(flatten)]
    pattern: PatternArgs,

    /// Calibration file (OpenCV FileStorage JSON).
    #[arg(short = 'c', long = "calib")]
    calib: PathBuf,

    /// Undistort frames before tracking.
    #[arg(long)]
    undistorted: bool,

    #[arg(required = true)]
    frames: Vec<PathBuf>,
}

/// Accept the single-dash `-pt` spelling of `--pt`.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|a| if a == "-pt" { OsString::from("--pt") } else { a })
        .collect()
}

fn load_config(args: &PatternArgs) -> Result<TrackerConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_json(path)?,
        None => {
            if args.width.is_none() || args.height.is_none() {
                return Err("board size required: pass -w <width> and -h <height> or --config".into());
            }
            TrackerConfig::default()
        }
    };
    let base = config.pattern;
    config.pattern = PatternSpec::new(
        args.pattern.unwrap_or(base.kind()),
        args.width.unwrap_or(base.board_width()),
        args.height.unwrap_or(base.board_height()),
        args.square_size.unwrap_or(base.square_size()),
    )?;
    log::info!(
        "pattern {} {}x{}, spacing {}",
        config.pattern.kind(),
        config.pattern.board_width(),
        config.pattern.board_height(),
        config.pattern.square_size()
    );
    Ok(config)
}

fn build_tracker(args: &PatternArgs) -> Result<PlanarTracker<DefaultFinder>, Box<dyn Error>> {
    let config = load_config(args)?;
    let finder = default_finder(&config);
    Ok(PlanarTracker::new(config, finder))
}

/// Run `per_frame` over every frame of every input, printing one JSON line each.
fn for_each_frame<F>(inputs: &[PathBuf], mut per_frame: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut(&Path, &Frame) -> Result<Value, TrackError>,
{
    for input in inputs {
        let mut seq = ImageSequence::open(input)?;
        while let Some(frame) = seq.next_frame()? {
            let path = seq.current_path().map(Path::to_path_buf).unwrap_or_default();
            let mut report = match per_frame(&path, &frame) {
                Ok(v) => v,
                Err(err) if !err.is_structural() => {
                    log::warn!("{}: {err}", path.display());
                    json!({ "found": true, "error": err.to_string() })
                }
                Err(err) => return Err(err.into()),
            };
            if let Value::Object(map) = &mut report {
                map.insert("frame".into(), json!(path.display().to_string()));
            }
            println!("{report}");
        }
    }
    Ok(())
}

fn output_path(out_dir: &Path, frame: &Path, suffix: &str) -> PathBuf {
    let stem = frame
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    out_dir.join(format!("{stem}_{suffix}.png"))
}

fn prepare_out_dir(out_dir: Option<&Path>) -> Result<(), Box<dyn Error>> {
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn save(out_dir: Option<&Path>, frame_path: &Path, suffix: &str, frame: &Frame) -> Option<String> {
    let dir = out_dir?;
    let path = output_path(dir, frame_path, suffix);
    match write_frame(frame, &path) {
        Ok(()) => Some(path.display().to_string()),
        Err(err) => {
            log::warn!("{err}");
            None
        }
    }
}

fn run_rectify(args: &RectifyArgs) -> Result<(), Box<dyn Error>> {
    let tracker = build_tracker(&args.pattern)?;
    let out_dir = args.out_dir.as_deref();
    prepare_out_dir(out_dir)?;
    for_each_frame(&args.frames, |path, frame| {
        let out = tracker.rectify(frame)?;
        log::info!("{}", detection_message(tracker.pattern().kind(), out.detection.found));
        let written = save(out_dir, path, "rectified", &out.rectified);
        Ok(json!({
            "found": out.detection.found,
            "homography": out.homography.map(|h| h.to_array()),
            "output": written,
        }))
    })
}

fn detection_message(kind: PatternKind, found: bool) -> String {
    let what = match kind {
        PatternKind::Checkerboard => "chessboard",
        PatternKind::SymmetricCircleGrid => "circle grid",
        PatternKind::AsymmetricCircleGrid => "asymmetric circle grid",
    };
    if found {
        format!("{what} detected")
    } else {
        format!("no {what} detected")
    }
}

fn run_undistort(args: &UndistortArgs) -> Result<(), Box<dyn Error>> {
    let camera = load_camera_parameters(&args.calib)?;
    let out_dir = args.out_dir.as_deref();
    prepare_out_dir(out_dir)?;
    for_each_frame(&args.frames, |path, frame| {
        let view = undistort_view(frame, &camera, args.mode)?;
        let written = save(out_dir, path, args.mode.name(), &view);
        Ok(json!({ "mode": args.mode.name(), "output": written }))
    })
}

fn run_track(args: &TrackArgs) -> Result<(), Box<dyn Error>> {
    let tracker = build_tracker(&args.pattern)?;
    let camera = load_camera_parameters(&args.calib)?;
    for_each_frame(&args.frames, |_, frame| track_frame(&tracker, &camera, frame, args.undistorted))
}

fn track_frame(
    tracker: &PlanarTracker<DefaultFinder>,
    camera: &CameraIntrinsics,
    frame: &Frame,
    undistort_first: bool,
) -> Result<Value, TrackError> {
    let out = if undistort_first {
        let view = tracker.undistort(frame, camera, UndistortMode::Undistorted)?;
        tracker.track(&view, camera, FrameView::Undistorted)?
    } else {
        tracker.track(frame, camera, FrameView::Raw)?
    };
    Ok(json!({
        "found": out.detection.found,
        "pose": out.estimate.as_ref().map(|e| e.pose.to_rows()),
        "inliers": out.estimate.as_ref().map(|e| &e.inliers),
        "rms_error": out.estimate.as_ref().map(|e| e.rms_error),
        "axes": out.axes,
    }))
}

fn run_homography_pose(args: &TrackArgs) -> Result<(), Box<dyn Error>> {
    let tracker = build_tracker(&args.pattern)?;
    let camera = load_camera_parameters(&args.calib)?;
    for_each_frame(&args.frames, |_, frame| {
        let out = tracker.homography_pose(frame, &camera)?;
        Ok(json!({
            "found": out.detection.found,
            "homography": out.homography.map(|h| h.to_array()),
            "pose": out.pose.map(|p| p.to_rows()),
        }))
    })
}

fn init_logging(verbose: u8, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = LogTracer::init();
        planar_pose::core::init_tracing(planar_pose::core::level_from_verbosity(verbose), json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = json;
        let _ = planar_pose::core::init_with_level(planar_pose::core::level_from_verbosity(verbose));
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    init_logging(cli.verbose, cli.log_json);
    match &cli.command {
        Command::Rectify(args) => run_rectify(args),
        Command::Undistort(args) => run_undistort(args),
        Command::Track(args) => run_track(args),
        Command::HomographyPose(args) => run_homography_pose(args),
    }
}
