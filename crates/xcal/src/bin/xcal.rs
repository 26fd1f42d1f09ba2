use std::error::Error;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use xcal::capture::{control_channel, ControlSender};
use xcal::core::{format_hms, load_json, ImageSize, StreamSpan};
use xcal::device::{
    load_intrinsics_json, load_opencv_xml, open_device, AcquireError, DeviceConfig,
};
use xcal::session::{run_session, SessionConfig};
use xcal::solve::{store, stereo_rectify};

/// Extrinsic calibration between an event camera and a depth camera.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Log level for the stderr logger. With the `tracing` feature this is
    /// the default filter, overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON log lines (builds with the `tracing` feature only).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture confirmed views from both cameras, solve and write the
    /// calibration file. Press Enter (or `c`) to accept a view, `q` to abort.
    Calibrate {
        /// Session config JSON.
        #[arg(long)]
        config: PathBuf,
        /// Override the config's output path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a calibration file.
    Show {
        path: PathBuf,
        /// Also print the rectification of the pair.
        #[arg(long)]
        rectify: bool,
    },
    /// Report the time span and frame rate of a recorded stream.
    Timestamps {
        /// Device config JSON.
        device: PathBuf,
    },
    /// Print device intrinsics and the field of view they imply.
    Intrinsics {
        /// JSON intrinsics file or OpenCV FileStorage XML.
        path: PathBuf,
        /// Camera node in an XML file.
        #[arg(long)]
        node: Option<String>,
        /// Image size as `WIDTHxHEIGHT`, for the field of view.
        #[arg(long, value_parser = parse_size)]
        size: Option<ImageSize>,
    },
}

fn parse_size(s: &str) -> Result<ImageSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{s}`"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok(ImageSize::new(w, h))
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.log_level, args.json_log)?;

    match args.command {
        Command::Calibrate { config, output } => calibrate(&config, output),
        Command::Show { path, rectify } => show(&path, rectify),
        Command::Timestamps { device } => timestamps(&device),
        Command::Intrinsics { path, node, size } => intrinsics(&path, node.as_deref(), size),
    }
}

fn init_logging(level: LevelFilter, json: bool) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        xcal::core::init_tracing(level, json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        xcal::core::init_with_level(level)?;
        if json {
            log::warn!("--json-log needs the `tracing` feature; using plain logs");
        }
    }
    Ok(())
}

/// Forward stdin lines to the capture loop.
fn spawn_operator(tx: ControlSender) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "" | "c" => {
                    tx.confirm();
                }
                "q" => {
                    tx.stop();
                    break;
                }
                other => eprintln!("unknown input `{other}`: Enter or `c` accepts, `q` aborts"),
            }
        }
    });
}

fn calibrate(config_path: &Path, output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let mut config = SessionConfig::load(config_path)?;
    if let Some(output) = output {
        config.output_path = output;
    }
    let (operator, control) = control_channel();
    spawn_operator(operator);
    println!(
        "Capturing {} views. Press Enter to accept the current view, `q` to abort.",
        config.accumulator.target_views
    );

    let outcome = run_session(&config, control)?;
    let r = &outcome.result;
    println!("Rotation (camera A -> B):\n{}", r.rotation);
    println!("Translation: {}", r.translation.transpose());
    println!(
        "RMS reprojection error: {:.4} px over {} views (A {:.4}, B {:.4})",
        r.rms_error, r.views_used, outcome.report.rms_a, outcome.report.rms_b
    );
    println!("Saved to {}", outcome.output_path.display());
    Ok(())
}

fn show(path: &Path, rectify: bool) -> Result<(), Box<dyn Error>> {
    let r = store::load(path)?;
    println!("Image size: {}", r.image_size);
    println!("Views used: {}", r.views_used);
    println!("Reprojection error: {:.4} px", r.rms_error);
    println!("cameraMatrix1:{}", r.intrinsics_a.camera_matrix.to_matrix());
    println!("distCoeffs1: {:?}", r.intrinsics_a.distortion);
    println!("cameraMatrix2:{}", r.intrinsics_b.camera_matrix.to_matrix());
    println!("distCoeffs2: {:?}", r.intrinsics_b.distortion);
    println!("R:{}", r.rotation);
    println!("T: {}", r.translation.transpose());
    println!(
        "Baseline: {:.6}, rotation angle: {:.4} deg",
        r.baseline(),
        r.rotation_angle_deg()
    );
    println!("E:{}", r.essential);
    println!("F:{}", r.fundamental);

    if rectify {
        let rect = stereo_rectify(&r);
        println!("R1:{}", rect.r1);
        println!("R2:{}", rect.r2);
        println!("P1:{}", rect.p1);
        println!("P2:{}", rect.p2);
        println!("Q:{}", rect.q);
    }
    Ok(())
}

fn timestamps(device_path: &Path) -> Result<(), Box<dyn Error>> {
    let mut config: DeviceConfig = load_json(device_path)?;
    config.pace = false;
    let mut device = open_device(&config)?;

    let mut stream: Option<StreamSpan> = None;
    loop {
        match device.acquire() {
            Ok(frame) => match stream.as_mut() {
                Some(s) => s.push(frame.timestamp),
                None => stream = Some(StreamSpan::start(frame.timestamp)),
            },
            Err(AcquireError::NoFrameAvailable) => thread::sleep(Duration::from_millis(1)),
            Err(AcquireError::EndOfStream) => break,
            Err(e) => {
                device.close();
                return Err(e.into());
            }
        }
    }
    device.close();

    println!("Device: {} ({:?})", config.id, config.kind);
    println!("Resolution: {}", device.resolution());
    let Some(stream) = stream else {
        println!("Frames: 0");
        return Ok(());
    };
    println!("Frames: {}", stream.frames);
    println!("First: {}", stream.first);
    println!("Last: {}", stream.last);
    println!(
        "Duration: {} ({:.3} s)",
        format_hms(xcal::core::Timestamp::relative(stream.duration().as_nanos() as i64)),
        stream.duration().as_secs_f64()
    );
    match stream.mean_fps() {
        Some(fps) => println!("Mean FPS: {fps:.2}"),
        None => println!("Mean FPS: n/a"),
    }
    Ok(())
}

fn intrinsics(path: &Path, node: Option<&str>, size: Option<ImageSize>) -> Result<(), Box<dyn Error>> {
    let is_xml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"));
    let intr = if is_xml {
        let node = node.ok_or("--node is required for XML intrinsics")?;
        load_opencv_xml(path, node)?
    } else {
        load_intrinsics_json(path)?
    };

    println!("Camera matrix:{}", intr.camera_matrix.to_matrix());
    println!("Distortion coefficients: {:?}", intr.distortion);
    if let Some(size) = size {
        let (h, v) = intr.camera_matrix.field_of_view_deg(size);
        println!("Resolution: {size}");
        println!("Field of view: {h:.2} deg horizontal, {v:.2} deg vertical");
    }
    Ok(())
}
