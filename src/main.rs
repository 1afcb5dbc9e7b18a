// SPDX-License-Identifier: MIT
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

mod child;
mod config;
mod display;
mod media;
mod progress;
mod registry;
mod report;
mod sampler;
mod scorer;
mod session;
mod tui;

use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::display::{QuietView, ScoreLine, SessionView};
use crate::media::ffmpeg::{CameraSettings, FfmpegDecoder};
use crate::media::{Decoder, MediaSource};
use crate::progress::ProgressBar;
use crate::registry::{FaceRegistry, RegisteredFace, format_ids};
use crate::report::{CsvReport, default_csv_path, write_summary};
use crate::sampler::paced::PacedFrameSource;
use crate::scorer::buffered::BufferedScorer;
use crate::scorer::engine::{EngineConfig, EngineScorer};
use crate::scorer::{FaceId, Region, Scorer};
use crate::session::{
    FrameSink, InterruptLatch, Session, SessionConfig, SessionOutcome, TerminationReason,
};
use crate::tui::app::{PreviewApp, PreviewMode};
use crate::tui::preview::PreviewView;

const SOURCE_ERROR_EXIT: u8 = 2;
const PROGRESS_LABEL: &str = "Video processed:";
const PROGRESS_REDRAWS: u64 = 200;

#[derive(Parser)]
#[command(
    name = "facereg",
    version,
    about = "facereg: face registration and analysis over video files and cameras"
)]
struct Cli {
    /// Directory holding the engine's data files and the face registry
    #[arg(short, long, global = true, env = "FACEREG_DATA_DIR")]
    data: Option<PathBuf>,
    /// Analysis engine executable
    #[arg(long, global = true, env = "FACEREG_ENGINE")]
    engine: Option<PathBuf>,
    /// Only print errors from the command itself
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face from a video file
    VideoRegister {
        id: FaceId,
        video: PathBuf,
        /// Frames per second to sample; 0 processes every frame
        #[arg(short, long, default_value = "0")]
        sampling_rate: u32,
        #[arg(long)]
        preview: bool,
        /// Restrict detection to x,y,width,height
        #[arg(long)]
        region: Option<Region>,
    },
    /// Register a face from a camera
    WebcamRegister {
        id: FaceId,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        camera: i32,
        #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
        resolution: Option<Vec<u32>>,
        /// Camera capture rate
        #[arg(long, default_value = "30")]
        cfps: u32,
        #[arg(long)]
        preview: bool,
        #[arg(long)]
        region: Option<Region>,
    },
    /// List registered IDs
    List,
    /// Remove one registered ID
    Unregister { id: FaceId },
    /// Remove every registered ID
    UnregisterAll,
    /// Analyze a video file and log every sampled frame to CSV
    AnalyzeVideo {
        #[arg(short, long)]
        input: PathBuf,
        /// Frames per second to sample; 0 processes every frame
        #[arg(long, default_value = "0")]
        sfps: u32,
        /// Replay the video until interrupted
        #[arg(long = "loop")]
        repeat: bool,
        /// CSV output path [default: <input>.csv]
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        region: Option<Region>,
    },
    /// Analyze a live camera feed
    AnalyzeWebcam {
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        camera: i32,
        /// Frames per second handed to the engine
        #[arg(long, default_value = "30")]
        pfps: u32,
        /// Camera capture rate
        #[arg(long, default_value = "30")]
        cfps: u32,
        #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
        resolution: Option<Vec<u32>>,
        /// Score every frame on the calling thread instead of a background worker
        #[arg(long)]
        sync: bool,
        /// CSV output path
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        preview: bool,
        #[arg(long)]
        region: Option<Region>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let globals = Globals {
        data: cli.data,
        engine: cli.engine,
    };

    match cli.command {
        Commands::VideoRegister {
            id,
            video,
            sampling_rate,
            preview,
            region,
        } => cmd_video_register(&globals, id, &video, sampling_rate, preview, region),
        Commands::WebcamRegister {
            id,
            camera,
            resolution,
            cfps,
            preview,
            region,
        } => {
            let settings = camera_settings(resolution.as_deref(), cfps)?;
            cmd_webcam_register(&globals, id, camera, settings, preview, region)
        }
        Commands::List => cmd_list(&globals),
        Commands::Unregister { id } => cmd_unregister(&globals, id),
        Commands::UnregisterAll => cmd_unregister_all(&globals),
        Commands::AnalyzeVideo {
            input,
            sfps,
            repeat,
            csv,
            region,
        } => cmd_analyze_video(&globals, &input, sfps, repeat, csv, region),
        Commands::AnalyzeWebcam {
            camera,
            pfps,
            cfps,
            resolution,
            sync,
            file,
            preview,
            region,
        } => {
            let settings = camera_settings(resolution.as_deref(), cfps)?;
            let options = WebcamAnalysis {
                camera,
                settings,
                processing_fps: pfps,
                sync,
                csv: file,
                preview,
                region,
            };
            cmd_analyze_webcam(&globals, &options)
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

struct Globals {
    data: Option<PathBuf>,
    engine: Option<PathBuf>,
}

impl Globals {
    fn data_dir(&self) -> Result<PathBuf> {
        config::resolve_data_dir(self.data.clone())
    }

    fn spawn_engine(&self, data_dir: &Path) -> Result<EngineScorer> {
        let program = config::resolve_engine(self.engine.clone())?;
        EngineScorer::spawn(&EngineConfig::new(program), data_dir)
    }
}

fn camera_settings(resolution: Option<&[u32]>, fps: u32) -> Result<CameraSettings> {
    let mut settings = CameraSettings {
        fps,
        ..CameraSettings::default()
    };
    if let Some(resolution) = resolution {
        let [width, height] = resolution else {
            bail!("--resolution takes exactly WIDTH and HEIGHT");
        };
        if *width == 0 || *height == 0 {
            bail!("camera resolution must be non-zero, got {width}x{height}");
        }
        settings.width = *width;
        settings.height = *height;
    }
    if settings.fps == 0 {
        bail!("camera capture rate must be at least 1 fps");
    }
    Ok(settings)
}

fn open_camera(index: i32, settings: CameraSettings) -> Result<FfmpegDecoder> {
    MediaSource::camera(index)?;
    Ok(FfmpegDecoder::open_camera(index, settings)?)
}

fn exit_code(outcome: &SessionOutcome) -> ExitCode {
    if let Some(e) = &outcome.source_error {
        eprintln!("Error: {e}");
    }
    if outcome.reason.is_error() {
        ExitCode::from(SOURCE_ERROR_EXIT)
    } else {
        ExitCode::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Terminal setup / teardown
// ---------------------------------------------------------------------------

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)
        .context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("failed to create terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Session plumbing
// ---------------------------------------------------------------------------

fn run_session<D: Decoder, W: Write, S: Scorer, V: SessionView>(
    source: PacedFrameSource<D, W>,
    scorer: &mut S,
    view: &mut V,
    config: SessionConfig,
    latch: &InterruptLatch,
    sink: Option<&mut dyn FrameSink>,
) -> Result<SessionOutcome> {
    let session = Session::new(config, scorer, view, latch.handle());
    match sink {
        Some(sink) => session.with_sink(sink).run(source),
        None => session.run(source),
    }
}

/// Runs the session inside the terminal preview, restoring the terminal on every path.
fn run_previewed<D: Decoder, W: Write, S: Scorer>(
    source: PacedFrameSource<D, W>,
    scorer: &mut S,
    app: PreviewApp,
    config: SessionConfig,
    latch: &InterruptLatch,
    sink: Option<&mut dyn FrameSink>,
) -> Result<SessionOutcome> {
    let mut terminal = setup_terminal()?;
    let result = {
        let mut view = PreviewView::new(&mut terminal, app, latch.handle());
        run_session(source, scorer, &mut view, config, latch, sink)
    };
    restore_terminal(&mut terminal)?;
    result
}

// ---------------------------------------------------------------------------
// Registration subcommands
// ---------------------------------------------------------------------------

fn cmd_video_register(
    globals: &Globals,
    id: FaceId,
    video: &Path,
    sampling_rate: u32,
    preview: bool,
    region: Option<Region>,
) -> Result<ExitCode> {
    let data_dir = globals.data_dir()?;
    MediaSource::file(video)?;
    let mut registry = FaceRegistry::open(&data_dir)?;
    let decoder = FfmpegDecoder::open_file(video)?;
    let mut scorer = globals.spawn_engine(&data_dir)?;

    if !preview {
        println!(
            "\nApp will exit when end of video is reached, Reg score reaches 100, or by pressing ctrl-C.\n"
        );
    }

    let latch = InterruptLatch::install()?;
    let source = PacedFrameSource::new(decoder, sampling_rate);
    let config = SessionConfig::registration(id, region);
    let outcome = if preview {
        let app = PreviewApp::new(video.display().to_string(), PreviewMode::Registration(id));
        run_previewed(source, &mut scorer, app, config, &latch, None)?
    } else {
        run_session(source, &mut scorer, &mut ScoreLine::stdout(), config, &latch, None)?
    };

    store_registration(&mut registry, id, &outcome)?;
    Ok(exit_code(&outcome))
}

fn cmd_webcam_register(
    globals: &Globals,
    id: FaceId,
    camera: i32,
    settings: CameraSettings,
    preview: bool,
    region: Option<Region>,
) -> Result<ExitCode> {
    let data_dir = globals.data_dir()?;
    let mut registry = FaceRegistry::open(&data_dir)?;
    let decoder = open_camera(camera, settings)?;
    let mut scorer = globals.spawn_engine(&data_dir)?;

    if !preview {
        println!("\nApp will exit when Reg score reaches 100, or by pressing ctrl-C.\n");
    }

    let latch = InterruptLatch::install()?;
    let source = PacedFrameSource::new(decoder, 0);
    let config = SessionConfig::registration(id, region);
    let outcome = if preview {
        let app = PreviewApp::new(format!("camera #{camera}"), PreviewMode::Registration(id));
        run_previewed(source, &mut scorer, app, config, &latch, None)?
    } else {
        run_session(source, &mut scorer, &mut ScoreLine::stdout(), config, &latch, None)?
    };

    store_registration(&mut registry, id, &outcome)?;
    Ok(exit_code(&outcome))
}

fn store_registration(
    registry: &mut FaceRegistry,
    id: FaceId,
    outcome: &SessionOutcome,
) -> Result<()> {
    println!("Session ended: {}", outcome.reason);
    if outcome.score.value() == 0 {
        println!("No face registered for ID {id}");
        return Ok(());
    }

    registry.add(RegisteredFace {
        id,
        score: outcome.score.value(),
        complete: outcome.score.is_max(),
        frames_scored: outcome.frames_scored,
        registered_at: SystemTime::now(),
    })?;
    println!("Registered ID: {id} (score {})", outcome.score);
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry subcommands
// ---------------------------------------------------------------------------

fn cmd_list(globals: &Globals) -> Result<ExitCode> {
    let registry = FaceRegistry::open(&globals.data_dir()?)?;
    for face in registry.list() {
        debug!(
            id = face.id,
            score = face.score,
            complete = face.complete,
            frames = face.frames_scored,
            "registered face"
        );
    }
    println!("Registered IDs: {}", format_ids(&registry.ids()));
    Ok(ExitCode::SUCCESS)
}

fn cmd_unregister(globals: &Globals, id: FaceId) -> Result<ExitCode> {
    let mut registry = FaceRegistry::open(&globals.data_dir()?)?;
    if !registry.remove(id)? {
        bail!("ID {id} is not registered");
    }
    println!("Unregistered ID: {id}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_unregister_all(globals: &Globals) -> Result<ExitCode> {
    let mut registry = FaceRegistry::open(&globals.data_dir()?)?;
    println!("IDs to unregister: {}", format_ids(&registry.ids()));
    registry.remove_all()?;
    println!("Successfully unregistered all IDs.");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Analysis subcommands
// ---------------------------------------------------------------------------

fn cmd_analyze_video(
    globals: &Globals,
    input: &Path,
    sampling_rate: u32,
    repeat: bool,
    csv: Option<PathBuf>,
    region: Option<Region>,
) -> Result<ExitCode> {
    let data_dir = globals.data_dir()?;
    MediaSource::file(input)?;
    let csv_path = csv.unwrap_or_else(|| default_csv_path(input));
    let mut scorer = globals.spawn_engine(&data_dir)?;
    let mut report = CsvReport::create(&csv_path)?;

    let mut code = ExitCode::SUCCESS;
    let mut pass = 0u64;
    loop {
        pass += 1;
        let decoder = FfmpegDecoder::open_file(input)?;
        let total = decoder.total_frames();
        let mut source = PacedFrameSource::new(decoder, sampling_rate);
        if let Some(total) = total {
            let mut progress = ProgressBar::new(total, PROGRESS_LABEL);
            progress.set_frequency_update(PROGRESS_REDRAWS);
            source = source.with_progress(progress);
        }

        // Fresh per pass: an interrupt ends this pass and the loop, never a later pass.
        let latch = InterruptLatch::install()?;
        let outcome = run_session(
            source,
            &mut scorer,
            &mut QuietView,
            SessionConfig::analysis(region),
            &latch,
            Some(&mut report as &mut dyn FrameSink),
        )?;
        debug!(pass, reason = %outcome.reason, "analysis pass finished");

        println!();
        write_summary(&mut io::stdout().lock(), &outcome)?;
        if outcome.reason.is_error() {
            code = exit_code(&outcome);
            break;
        }
        if !repeat || outcome.reason == TerminationReason::UserInterrupted {
            break;
        }
    }

    debug!(rows = report.rows(), "csv report complete");
    report.finish()?;
    println!("Output written to file: {}", csv_path.display());
    Ok(code)
}

struct WebcamAnalysis {
    camera: i32,
    settings: CameraSettings,
    processing_fps: u32,
    sync: bool,
    csv: Option<PathBuf>,
    preview: bool,
    region: Option<Region>,
}

fn cmd_analyze_webcam(globals: &Globals, options: &WebcamAnalysis) -> Result<ExitCode> {
    let data_dir = globals.data_dir()?;
    let decoder = open_camera(options.camera, options.settings)?;
    let engine = globals.spawn_engine(&data_dir)?;
    let mut scorer: Box<dyn Scorer> = if options.sync {
        Box::new(engine)
    } else {
        Box::new(BufferedScorer::spawn(engine)?)
    };
    let mut report = options.csv.as_deref().map(CsvReport::create).transpose()?;

    if !options.preview {
        println!("\nPress ctrl-C to stop.\n");
    }

    let latch = InterruptLatch::install()?;
    let source = PacedFrameSource::new(decoder, options.processing_fps);
    let config = SessionConfig::analysis(options.region);
    let sink = report.as_mut().map(|r| r as &mut dyn FrameSink);
    let outcome = if options.preview {
        let app = PreviewApp::new(format!("camera #{}", options.camera), PreviewMode::Analysis);
        run_previewed(source, &mut scorer, app, config, &latch, sink)?
    } else {
        run_session(source, &mut scorer, &mut ScoreLine::stdout(), config, &latch, sink)?
    };

    write_summary(&mut io::stdout().lock(), &outcome)?;
    if let Some(report) = report {
        report.finish()?;
        if let Some(path) = &options.csv {
            println!("Output written to file: {}", path.display());
        }
    }
    Ok(exit_code(&outcome))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_registration_flags() {
        let cli = Cli::try_parse_from([
            "facereg",
            "--data",
            "/tmp",
            "video-register",
            "3",
            "clip.mp4",
            "-s",
            "5",
            "--region",
            "10,10,200,200",
        ])
        .unwrap();
        let Commands::VideoRegister {
            id,
            sampling_rate,
            region,
            preview,
            ..
        } = cli.command
        else {
            panic!("expected video-register");
        };
        assert_eq!((id, sampling_rate, preview), (3, 5, false));
        assert_eq!(region.map(|r| r.width), Some(200));
    }

    #[test]
    fn parses_webcam_analysis_flags() {
        let cli = Cli::try_parse_from([
            "facereg",
            "analyze-webcam",
            "-c",
            "1",
            "--resolution",
            "640",
            "480",
            "--pfps",
            "10",
            "--sync",
        ])
        .unwrap();
        let Commands::AnalyzeWebcam {
            camera,
            resolution,
            pfps,
            sync,
            ..
        } = cli.command
        else {
            panic!("expected analyze-webcam");
        };
        assert_eq!((camera, pfps, sync), (1, 10, true));
        assert_eq!(resolution, Some(vec![640, 480]));
    }

    #[test]
    fn loop_flag_maps_to_repeat() {
        let cli = Cli::try_parse_from(["facereg", "analyze-video", "-i", "a.mp4", "--loop"]).unwrap();
        assert!(matches!(cli.command, Commands::AnalyzeVideo { repeat: true, .. }));
    }

    #[test]
    fn camera_settings_validation() {
        let settings = camera_settings(Some(&[640, 480]), 15).unwrap();
        assert_eq!((settings.width, settings.height, settings.fps), (640, 480, 15));
        assert_eq!(camera_settings(None, 30).unwrap(), CameraSettings::default());
        assert!(camera_settings(Some(&[0, 480]), 30).is_err());
        assert!(camera_settings(None, 0).is_err());
    }

    #[test]
    fn negative_camera_is_rejected_before_opening() {
        let err = open_camera(-1, CameraSettings::default())
            .err()
            .expect("open should fail");
        assert!(err.to_string().contains("invalid camera index -1"));
    }
}
