//! # tessel CLI
//!
//! Command-line front-end for the Tessel render pipeline. Renders the
//! built-in demo scene with settings from a `tessel.toml` file and flags.

mod demo;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tessel_core::{
    FieldSettings, FrameWriter, MotionBlurSettings, RenderSettings, ReportKind, ReportList,
    TesselConfig, MAX_OSA, MAX_THREADS,
};
use tessel_render::{FrameRange, Render, RenderPipeline};

use demo::DEMO_SCENE;

#[derive(Parser)]
#[command(name = "tessel", version, about = "Tessel: tiled multi-threaded renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a single frame to the output path
    Render {
        #[command(flatten)]
        options: RenderOptions,

        /// Frame to render (defaults to the current frame of the config)
        #[arg(short, long)]
        frame: Option<i32>,
    },
    /// Render a frame range as stills or an animated PNG
    Anim {
        #[command(flatten)]
        options: RenderOptions,

        #[arg(short, long)]
        start: Option<i32>,

        #[arg(short, long)]
        end: Option<i32>,

        #[arg(long)]
        step: Option<i32>,

        /// Write one animated PNG instead of numbered stills
        #[arg(long)]
        movie: bool,

        /// Playback rate of the animated PNG
        #[arg(long, default_value = "24")]
        fps: u16,
    },
    /// Validate the render settings without rendering
    Check {
        #[command(flatten)]
        options: RenderOptions,

        /// Print the resolved settings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and machine information
    Info,
}

/// Settings shared by every command that renders.
#[derive(Args, Debug, Default)]
struct RenderOptions {
    /// Path to a tessel.toml file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of render threads (defaults to the CPU count)
    #[arg(short, long)]
    threads: Option<usize>,

    #[arg(long)]
    width: Option<i32>,

    #[arg(long)]
    height: Option<i32>,

    /// Output path pattern, `#` runs are replaced by the frame number
    #[arg(short, long)]
    output: Option<String>,

    /// Anti-aliasing samples per pixel
    #[arg(long)]
    osa: Option<u32>,

    /// Render every AA sample separately and merge afterwards
    #[arg(long)]
    full_sample: bool,

    /// Motion blur samples
    #[arg(long)]
    blur: Option<u32>,

    /// Render interlaced fields
    #[arg(long)]
    fields: bool,
}

/// Resolution used when no config file is given.
const DEMO_SIZE: (i32, i32) = (640, 360);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render { options, frame } => cmd_render(&options, frame),
        Commands::Anim {
            options,
            start,
            end,
            step,
            movie,
            fps,
        } => cmd_anim(&options, start, end, step, movie, fps),
        Commands::Check { options, json } => cmd_check(&options, json),
        Commands::Info => cmd_info(),
    }
}

fn load_settings(options: &RenderOptions) -> Result<RenderSettings> {
    let mut settings = match &options.config {
        Some(path) => {
            TesselConfig::load_from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?
                .render
        }
        None => RenderSettings::with_size(DEMO_SIZE.0, DEMO_SIZE.1),
    };
    apply_options(&mut settings, options)?;
    Ok(settings)
}

fn apply_options(settings: &mut RenderSettings, options: &RenderOptions) -> Result<()> {
    if let Some(threads) = options.threads {
        settings.threads = Some(threads);
    }
    if let Some(width) = options.width {
        settings.resolution_x = width;
    }
    if let Some(height) = options.height {
        settings.resolution_y = height;
    }
    if settings.resolution_x <= 0 || settings.resolution_y <= 0 {
        anyhow::bail!(
            "invalid resolution {}x{}",
            settings.resolution_x,
            settings.resolution_y
        );
    }
    if let Some(output) = &options.output {
        let path = Path::new(output);
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                settings.output.extension = ext.to_ascii_lowercase();
                settings.output.path = path.with_extension("").to_string_lossy().into_owned();
            }
            None => settings.output.path = output.clone(),
        }
    }
    if let Some(osa) = options.osa {
        settings.osa = osa;
    }
    if options.full_sample {
        settings.full_sample = true;
        if settings.osa == 0 {
            settings.osa = 8;
        }
    }
    if let Some(samples) = options.blur {
        settings.motion_blur = Some(MotionBlurSettings {
            samples,
            ..settings.motion_blur.unwrap_or_default()
        });
    }
    if options.fields && settings.fields.is_none() {
        settings.fields = Some(FieldSettings::default());
    }
    Ok(())
}

fn new_render() -> Render {
    let mut re = Render::new("tessel-cli");
    re.init_callbacks();
    re
}

fn print_reports(reports: &ReportList) {
    for report in reports.iter() {
        match report.kind {
            ReportKind::Error => eprintln!("   ✗ {}", report.message),
            _ => println!("   {}", report),
        }
    }
}

fn cmd_render(options: &RenderOptions, frame: Option<i32>) -> Result<()> {
    let settings = load_settings(options)?;
    let frame = frame.unwrap_or(settings.frame_current);
    let pipeline = RenderPipeline::new(demo::library(settings));

    println!("🎬 Rendering frame {} of \"{}\"", frame, DEMO_SCENE);
    let start = Instant::now();
    let mut re = new_render();
    let mut writer = tessel_encode::PngWriter::new();
    let outcome = pipeline.render_frame(
        &mut re,
        DEMO_SCENE,
        None,
        None,
        frame,
        Some(&mut writer as &mut dyn FrameWriter),
    );
    print_reports(re.reports());
    outcome.with_context(|| format!("failed to render frame {}", frame))?;
    if re.reports().has_errors() {
        anyhow::bail!(
            "render finished with errors: {}",
            re.reports().last_error().unwrap_or("unknown")
        );
    }

    let (w, h) = re.window_size();
    println!("   Size:      {}x{}", w, h);
    println!("   Threads:   {}", re.thread_count());
    println!("   Time:      {:.2}s", start.elapsed().as_secs_f64());
    println!("✅ Done");
    Ok(())
}

fn cmd_anim(
    options: &RenderOptions,
    start: Option<i32>,
    end: Option<i32>,
    step: Option<i32>,
    movie: bool,
    fps: u16,
) -> Result<()> {
    let mut settings = load_settings(options)?;
    settings.output.movie |= movie;
    let defaults = FrameRange::from_settings(&settings);
    let range = FrameRange::new(
        start.unwrap_or(defaults.start),
        end.unwrap_or(defaults.end),
        step.unwrap_or(defaults.step),
    );
    if range.end < range.start {
        anyhow::bail!("end frame {} is before start frame {}", range.end, range.start);
    }

    let mut writer = tessel_encode::writer_for(&settings.output, fps);
    let pipeline = RenderPipeline::new(demo::library(settings));

    println!(
        "🎬 Rendering frames {}..{} (step {}) of \"{}\"",
        range.start, range.end, range.step, DEMO_SCENE
    );
    let timer = Instant::now();
    let mut re = new_render();
    let outcome = pipeline.render_anim(&mut re, DEMO_SCENE, None, range, writer.as_mut());
    print_reports(re.reports());
    let summary = outcome.context("animation render failed")?;

    println!("   Rendered:  {}", summary.rendered);
    if summary.skipped > 0 {
        println!("   Skipped:   {}", summary.skipped);
    }
    println!("   Time:      {:.2}s", timer.elapsed().as_secs_f64());
    if summary.cancelled {
        anyhow::bail!("animation was cancelled");
    }
    println!("✅ Done");
    Ok(())
}

fn cmd_check(options: &RenderOptions, json: bool) -> Result<()> {
    let settings = load_settings(options)?;
    let pipeline = RenderPipeline::new(demo::library(settings));
    let scene = pipeline
        .library()
        .scene(DEMO_SCENE)
        .context("demo scene missing from library")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scene.settings)?);
    }

    println!("🔍 Checking render settings...");
    let mut reports = ReportList::new();
    let allowed = pipeline.is_rendering_allowed(scene, None, &mut reports);
    print_reports(&reports);
    allowed.context("rendering is not allowed")?;

    let settings = &scene.settings;
    let (w, h) = settings.window_size();
    let modes = settings.sample_modes();
    println!("   ✓ Size {}x{} OK", w, h);
    println!("   ✓ Threads {} OK", settings.thread_count());
    println!(
        "   ✓ Samples {} (full sample: {}, tile file: {}) OK",
        settings.osa_level(),
        modes.full_sample,
        modes.tile_file
    );
    println!("✅ Settings are valid");
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("Tessel Renderer");
    println!("   Version:   {}", env!("CARGO_PKG_VERSION"));
    println!("   Threads:   {} (max {})", RenderSettings::default().thread_count(), MAX_THREADS);
    println!("   Max OSA:   {}", MAX_OSA);
    println!("   Stills:    png (with stamp), jpg, bmp, tga, tiff");
    println!("   Movies:    apng");
    Ok(())
}
