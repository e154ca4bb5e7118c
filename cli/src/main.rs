use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pedwatch_core::{
    classifier::{LinearClassifier, ModelArtifact, SvmParams},
    config::{load_config, DetectConfig},
    detection::BBox,
    features::DescriptorExtractor,
    pipeline::{
        ControlFlags, DetectionSession, FrameOutcome, FrameReport, SessionConfig, SessionControl,
    },
    rendering::{render, VisualMode},
    runtime::{run_live, CancelFlag, Flow},
    scanner::WindowScanner,
    training::{Trainer, TrainingConfig},
    video::{FrameSource, ImageSequenceSource, RgbFrame},
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pedwatch",
    version,
    about = "Sliding-window pedestrian detector (HOG + LBP, linear SVM)",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model from a positive and a negative image corpus.
    Train {
        /// Directory of pedestrian crops (searched recursively)
        #[arg(long)]
        positives: PathBuf,

        /// Directory of background crops (searched recursively)
        #[arg(long)]
        negatives: PathBuf,

        /// Where to write the model
        #[arg(short, long, default_value = "pedwatch-model.json")]
        output: PathBuf,

        #[arg(long)]
        max_positive: Option<usize>,

        #[arg(long)]
        max_negative: Option<usize>,

        /// Share of samples held out for the accuracy estimate
        #[arg(long, default_value_t = 0.2)]
        test_fraction: f64,

        /// Solver passes before giving up
        #[arg(long, default_value_t = 5000)]
        max_iter: usize,

        /// Inverse regularisation strength
        #[arg(long, default_value_t = 1.0)]
        c: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// JSON detection config; only its extractor section is used
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Detect pedestrians in a single image.
    Scan {
        #[command(flatten)]
        detect: DetectArgs,

        /// Input image
        #[arg(short, long)]
        image: PathBuf,

        /// Annotated output image
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the live acquisition + detection loop over a frame source.
    Watch {
        #[command(flatten)]
        detect: DetectArgs,

        /// Directory of still frames, played in file-name order
        #[arg(long, conflicts_with = "video", required_unless_present = "video")]
        frames: Option<PathBuf>,

        /// Video file (needs the `ffmpeg` feature)
        #[arg(long)]
        video: Option<PathBuf>,

        /// Write one PNG per processed frame here
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// JSON-lines detection report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Scan one frame out of every N
        #[arg(long)]
        frame_skip: Option<u32>,

        #[arg(long, value_enum, default_value_t = VisualArg::Annotated)]
        visual: VisualArg,
    },

    /// Print a model's metadata and check it against the extractor settings.
    Inspect {
        #[arg(short, long)]
        model: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Options shared by every command that runs detection.
#[derive(Args)]
struct DetectArgs {
    /// Trained model (JSON)
    #[arg(short, long)]
    model: PathBuf,

    /// JSON detection config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decision threshold; negative values raise recall
    #[arg(long, allow_hyphen_values = true)]
    threshold: Option<f32>,

    /// Window stride in working-resolution pixels (both axes)
    #[arg(long)]
    stride: Option<u32>,

    /// IoU above which overlapping detections are merged
    #[arg(long)]
    overlap: Option<f32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum VisualArg {
    Annotated,
    Original,
}

impl From<VisualArg> for VisualMode {
    fn from(arg: VisualArg) -> Self {
        match arg {
            VisualArg::Annotated => VisualMode::Annotated,
            VisualArg::Original => VisualMode::Original,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            positives,
            negatives,
            output,
            max_positive,
            max_negative,
            test_fraction,
            max_iter,
            c,
            seed,
            config,
        } => {
            let training = TrainingConfig {
                positive_dir: positives,
                negative_dir: negatives,
                max_positive,
                max_negative,
                test_fraction,
                svm: SvmParams {
                    c,
                    max_iter,
                    seed,
                    ..SvmParams::default()
                },
            };
            cmd_train(training, output, config)
        }
        Commands::Scan {
            detect,
            image,
            output,
        } => cmd_scan(detect, image, output),
        Commands::Watch {
            detect,
            frames,
            video,
            output_dir,
            report,
            frame_skip,
            visual,
        } => cmd_watch(
            detect,
            WatchInput::from_args(frames, video)?,
            output_dir,
            report,
            frame_skip,
            visual.into(),
        ),
        Commands::Inspect { model, config } => cmd_inspect(model, config),
    }
}

// ── train ─────────────────────────────────────────────────────────────────────

fn cmd_train(training: TrainingConfig, output: PathBuf, config: Option<PathBuf>) -> Result<()> {
    info!("Training");
    info!("  positives : {}", training.positive_dir.display());
    info!("  negatives : {}", training.negative_dir.display());
    info!("  output    : {}", output.display());

    let detect = read_config(config.as_deref())?;
    let extractor =
        DescriptorExtractor::new(detect.extractor).context("invalid extractor settings")?;
    let trainer = Trainer::new(extractor);

    let pb = progress_bar("Describing images");
    let pb2 = pb.clone();
    let outcome = trainer
        .run(&training, move |done, total| {
            pb2.set_length(total as u64);
            pb2.set_position(done as u64);
        })
        .context("training failed")?;
    pb.finish_with_message("Described.");

    for warning in &outcome.report.warnings {
        warn!("{warning}");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.report)?);

    trainer
        .save(&outcome, &output)
        .with_context(|| format!("failed to write model: {}", output.display()))?;
    info!("Model saved to {}", output.display());
    Ok(())
}

// ── scan ──────────────────────────────────────────────────────────────────────

fn cmd_scan(args: DetectArgs, image: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let config = args.resolve()?;
    // A single image is always scanned.
    let session_config = SessionConfig {
        frame_skip: 1,
        ..config.session
    };
    let control = SessionControl::new(ControlFlags::default());
    let mut session =
        DetectionSession::new(build_scanner(&args.model, &config)?, session_config, control)
            .context("invalid session settings")?;

    let img = image::open(&image)
        .with_context(|| format!("failed to read image: {}", image.display()))?
        .into_rgb8();
    let frame = RgbFrame::from_image(img, 0);

    let FrameOutcome::Processed(report) = session.process(Some(&frame)) else {
        bail!("image could not be scanned: {}", image.display());
    };

    info!(
        candidates = report.candidates,
        detections = report.detections.len(),
        "scan complete"
    );
    println!("{}", serde_json::to_string_pretty(&report.detections)?);

    if let Some(output) = output {
        save_rendered(&frame, &report.detections, VisualMode::Annotated, &output)?;
        info!("Annotated image saved to {}", output.display());
    }
    Ok(())
}

// ── watch ─────────────────────────────────────────────────────────────────────

enum WatchInput {
    Frames(PathBuf),
    Video(PathBuf),
}

impl WatchInput {
    fn from_args(frames: Option<PathBuf>, video: Option<PathBuf>) -> Result<Self> {
        match (frames, video) {
            (Some(dir), None) => Ok(WatchInput::Frames(dir)),
            (None, Some(path)) => Ok(WatchInput::Video(path)),
            _ => bail!("exactly one of --frames or --video is required"),
        }
    }

    fn open(self) -> pedwatch_core::Result<Box<dyn FrameSource>> {
        match self {
            WatchInput::Frames(dir) => Ok(Box::new(ImageSequenceSource::open(dir)?)),
            #[cfg(feature = "ffmpeg")]
            WatchInput::Video(path) => Ok(Box::new(
                pedwatch_core::video::VideoFileSource::open(path)?,
            )),
            #[cfg(not(feature = "ffmpeg"))]
            WatchInput::Video(_) => Err(pedwatch_core::Error::InvalidInput(
                "this build has no video support; rebuild with `--features ffmpeg` or use --frames"
                    .into(),
            )),
        }
    }
}

fn cmd_watch(
    args: DetectArgs,
    input: WatchInput,
    output_dir: Option<PathBuf>,
    report: Option<PathBuf>,
    frame_skip: Option<u32>,
    visual: VisualMode,
) -> Result<()> {
    let mut config = args.resolve()?;
    if let Some(skip) = frame_skip {
        config.session.frame_skip = skip;
    }

    let control = SessionControl::new(ControlFlags {
        visual_mode: visual,
        ..ControlFlags::default()
    });
    let mut session = DetectionSession::new(
        build_scanner(&args.model, &config)?,
        config.session,
        control.clone(),
    )
    .context("invalid session settings")?;

    if let Some(dir) = &output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory: {}", dir.display()))?;
    }
    let mut report_out = match &report {
        Some(path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("failed to create report: {}", path.display())
        })?)),
        None => None,
    };

    let pb = spinner("Watching…");
    let pb2 = pb.clone();
    let cancel = CancelFlag::new();
    let mut failure: Option<anyhow::Error> = None;

    let summary = run_live(
        move || input.open(),
        &mut session,
        &cancel,
        |frame, outcome| {
            pb2.tick();
            let FrameOutcome::Processed(report) = outcome else {
                return Flow::Continue;
            };
            if report.alert {
                pb2.set_message(format!(
                    "{} pedestrian(s) at frame {}",
                    report.detections.len(),
                    report.index
                ));
            }
            let written = write_report_line(report_out.as_mut(), report).and_then(|()| {
                match &output_dir {
                    Some(dir) => save_rendered(
                        frame,
                        &report.detections,
                        report.visual_mode,
                        &dir.join(format!("frame_{:06}.png", report.index)),
                    ),
                    None => Ok(()),
                }
            });
            match written {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    failure = Some(e);
                    Flow::Stop
                }
            }
        },
    )
    .context("live loop failed")?;
    pb.finish_with_message("Stream finished.");

    if let Some(e) = failure {
        return Err(e);
    }
    if let Some(mut out) = report_out {
        out.flush().context("failed to flush report")?;
    }

    let stats = control.stats();
    info!(
        acquired = summary.acquired,
        dropped = summary.dropped,
        processed = summary.processed,
        read_failures = summary.read_failures,
        total_detections = stats.total_detections,
        "watch finished"
    );
    Ok(())
}

fn write_report_line(
    out: Option<&mut BufWriter<File>>,
    report: &FrameReport,
) -> Result<()> {
    let Some(out) = out else {
        return Ok(());
    };
    serde_json::to_writer(&mut *out, report).context("failed to encode report line")?;
    writeln!(out).context("failed to write report line")?;
    Ok(())
}

// ── inspect ───────────────────────────────────────────────────────────────────

fn cmd_inspect(model: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let artifact = ModelArtifact::read(&model)
        .with_context(|| format!("failed to load model: {}", model.display()))?;

    println!("model       : {}", model.display());
    println!("format      : {} v{}", artifact.format, artifact.version);
    println!(
        "patch       : {}x{}",
        artifact.extractor.patch_width, artifact.extractor.patch_height
    );
    println!("feature_len : {}", artifact.feature_len);
    println!("bias        : {:.6}", artifact.bias);
    if let Some(trained) = &artifact.trained {
        println!(
            "trained on  : {} positive / {} negative",
            trained.positives, trained.negatives
        );
        match trained.accuracy {
            Some(acc) => println!("accuracy    : {acc:.4}"),
            None => println!("accuracy    : not measured"),
        }
        println!(
            "solver      : {} iterations, {}",
            trained.iterations,
            if trained.converged { "converged" } else { "not converged" }
        );
    }

    let detect = read_config(config.as_deref())?;
    let extractor =
        DescriptorExtractor::new(detect.extractor).context("invalid extractor settings")?;
    artifact
        .into_classifier(&extractor)
        .context("model does not match the extractor settings")?;
    println!("status      : compatible");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

impl DetectArgs {
    /// Config file (or defaults) with the command-line overrides applied.
    fn resolve(&self) -> Result<DetectConfig> {
        let mut config = read_config(self.config.as_deref())?;
        if let Some(threshold) = self.threshold {
            config.scan.threshold = threshold;
        }
        if let Some(stride) = self.stride {
            config.scan.stride_x = stride;
            config.scan.stride_y = stride;
        }
        if let Some(overlap) = self.overlap {
            config.session.overlap_threshold = overlap;
        }
        Ok(config)
    }
}

fn read_config(path: Option<&Path>) -> Result<DetectConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("failed to load config: {}", path.display()))
        }
        None => Ok(DetectConfig::default()),
    }
}

fn build_scanner(model: &Path, config: &DetectConfig) -> Result<WindowScanner> {
    let extractor =
        DescriptorExtractor::new(config.extractor.clone()).context("invalid extractor settings")?;
    let classifier = LinearClassifier::load(model, &extractor)
        .with_context(|| format!("failed to load model: {}", model.display()))?;
    WindowScanner::new(extractor, classifier, config.scan).context("invalid scan settings")
}

fn save_rendered(
    frame: &RgbFrame,
    detections: &[BBox],
    mode: VisualMode,
    path: &Path,
) -> Result<()> {
    let img = render(frame, detections, mode).context("frame buffer has the wrong size")?;
    img.save(path)
        .with_context(|| format!("failed to write image: {}", path.display()))
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

fn progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(msg.to_string());
    pb
}
