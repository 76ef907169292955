use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::recognizer::FeatureStrategy;
use rollcall_core::{
    CascadeDetector, DetectionParams, FaceDetector, FullFace, LivenessChecker, MaskDetector,
    Recognizer, UpperFace,
};
use rollcall_hw::Camera;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance engine diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture frames from a camera and report format and brightness
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(short, long, default_value_t = 10)]
        frames: usize,
        /// Save the last captured frame here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Detect faces in a still image
    Detect {
        image: PathBuf,
        #[arg(short, long, env = "ROLLCALL_CASCADE_PATH")]
        cascade: PathBuf,
        #[arg(long, default_value_t = 1.1)]
        scale_factor: f32,
        #[arg(long, default_value_t = 5)]
        min_neighbors: u32,
        #[arg(long, default_value_t = 60)]
        min_size: u32,
        /// Write the image with detection boxes drawn
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Run the liveness check on a face crop
    Liveness { image: PathBuf },
    /// Run the mask detector on a face crop
    Mask { image: PathBuf },
    /// Score a face crop against every student of a roster
    Match {
        probe: PathBuf,
        #[arg(short, long, env = "ROLLCALL_ROSTER")]
        roster: PathBuf,
        /// Use the upper-face recognizer
        #[arg(long)]
        masked: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test {
            device,
            frames,
            save,
        } => {
            let mut camera = Camera::open(&device).with_context(|| format!("opening {device}"))?;
            println!(
                "{device}: {}x{} {:?}",
                camera.width,
                camera.height,
                camera.pixel_format()
            );
            let mut last = None;
            let mut dark = 0;
            for i in 0..frames {
                let frame = camera.capture_frame().with_context(|| format!("frame {i}"))?;
                if rollcall_hw::frame::is_dark_frame(&frame, 0.95) {
                    dark += 1;
                }
                last = Some(frame);
            }
            println!("captured {frames} frames, {dark} dark");
            if let (Some(path), Some(frame)) = (save, last) {
                frame.save(&path)?;
                println!("saved {}", path.display());
            }
        }
        Commands::Detect {
            image,
            cascade,
            scale_factor,
            min_neighbors,
            min_size,
            annotate,
        } => {
            let mut frame = open_rgb(&image)?;
            let mut detector = CascadeDetector::load(&cascade.to_string_lossy())?;
            let params = DetectionParams {
                scale_factor,
                min_neighbors,
                min_size,
            };
            let faces = detector.detect(&frame, &params);
            println!("{} face(s)", faces.len());
            for f in &faces {
                println!(
                    "  x={} y={} w={} h={} neighbours={}",
                    f.bbox.x, f.bbox.y, f.bbox.width, f.bbox.height, f.confidence
                );
            }
            if let Some(out) = annotate {
                let overlays: Vec<_> = faces
                    .iter()
                    .map(|f| rollcall_core::FaceOverlay {
                        bbox: f.bbox,
                        tracking_id: f.tracking_id,
                        status: rollcall_core::FaceStatus::Detected,
                        label: None,
                        confidence: f.confidence,
                        masked: false,
                    })
                    .collect();
                rollcall_core::overlay::annotate(&mut frame, &overlays);
                frame.save(&out)?;
                println!("wrote {}", out.display());
            }
        }
        Commands::Liveness { image } => {
            let result = LivenessChecker::default().check(&open_rgb(&image)?);
            println!(
                "{} (confidence {:.0}%): {}",
                if result.is_live { "live" } else { "not live" },
                result.confidence,
                result.reason
            );
            println!(
                "  laplacian variance {:.1}, high-frequency ratio {:.3}",
                result.laplacian_variance, result.high_freq_ratio
            );
        }
        Commands::Mask { image } => {
            let face = open_rgb(&image)?;
            match MaskDetector::new().analyze(&face) {
                Some(s) => println!(
                    "{} (score {}): hue-std {:.1}, sat-std {:.1}, edge ratio {:.3}, texture {:.1}",
                    if s.is_masked() { "masked" } else { "not masked" },
                    s.score(),
                    s.hue_std,
                    s.saturation_std,
                    s.edge_ratio,
                    s.texture
                ),
                None => println!("empty image"),
            }
        }
        Commands::Match {
            probe,
            roster,
            masked,
        } => {
            let roster = rollcall_core::load_roster(&roster)?;
            let face = open_rgb(&probe)?;
            if masked {
                print_scores(Recognizer::new(UpperFace), &roster, &face);
            } else {
                print_scores(Recognizer::new(FullFace), &roster, &face);
            }
        }
    }

    Ok(())
}

fn open_rgb(path: &Path) -> Result<image::RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("reading {}", path.display()))?
        .to_rgb8())
}

fn print_scores<S: FeatureStrategy>(
    mut recognizer: Recognizer<S>,
    roster: &rollcall_core::Roster,
    face: &image::RgbImage,
) {
    let stats = recognizer.precompute_enrollment(roster);
    println!(
        "{}: {} of {} students enrolled ({} images skipped)",
        recognizer.strategy().name(),
        stats.identities,
        roster.len(),
        stats.skipped_images
    );
    let probe = recognizer.prepare(face);
    let mut scores: Vec<_> = roster
        .iter()
        .map(|s| (recognizer.compare(&probe, s), s))
        .collect();
    scores.sort_by(|a, b| b.0.total_cmp(&a.0));
    for (score, student) in scores {
        println!("  {score:6.2}  {} ({})", student.name, student.id);
    }
}
