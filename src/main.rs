use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use celebmatch::context::{self, AppContext};
use celebmatch::identify::Identification;
use celebmatch::video::Camera;
use celebmatch::{builder, config, server, VggFaceExtractor};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

/// Frames discarded before a webcam snapshot so exposure can settle.
const CAMERA_WARMUP_FRAMES: usize = 10;

#[derive(Parser)]
#[command(name = "celebmatch")]
#[command(version, about = "Find the celebrity whose face is closest to yours")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct GallerySource {
    /// Text file listing one gallery image path per line
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Directory laid out as <dir>/<Person_Name>/<image>
    #[arg(long)]
    images: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed gallery images and write the gallery file
    Build {
        #[command(flatten)]
        source: GallerySource,
        /// Where to write the gallery (defaults to artifacts.gallery_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Match a photo against the gallery
    Match {
        /// Image file to identify
        image: PathBuf,
    },
    /// Take a webcam snapshot and match it against the gallery
    Capture {
        /// Camera device (defaults to the configured camera)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Run the HTTP API
    Serve {
        /// Listen address (defaults to server.addr)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { source, output } => build(&cfg, source, output),
        Commands::Match { image } => match_file(cfg, &image),
        Commands::Capture { device } => capture(cfg, device),
        Commands::Serve { addr } => serve(cfg, addr),
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn build(cfg: &config::Config, source: GallerySource, output: Option<PathBuf>) -> Result<()> {
    let paths = match (source.manifest, source.images) {
        (Some(manifest), _) => builder::read_manifest(&manifest)?,
        (None, Some(dir)) => builder::scan_directory(&dir)?,
        (None, None) => anyhow::bail!("pass --manifest or --images"),
    };
    info!("Building gallery from {} image(s)", paths.len());

    let report = if cfg.locate_faces_on_build {
        let mut pipeline =
            context::load_pipeline(cfg).context("Failed to initialize face pipeline")?;
        builder::build_located(&paths, &mut pipeline)
    } else {
        let mut extractor = VggFaceExtractor::load(cfg.model.clone())
            .context("Failed to initialize embedding model")?;
        builder::build(&paths, &mut extractor)
    };

    let (gallery_file, failures_file) = match output {
        Some(path) => {
            let failures = path.with_file_name("failed_files.txt");
            (path, failures)
        }
        None => (
            cfg.artifacts.gallery_file.clone(),
            cfg.artifacts.failures_file(),
        ),
    };
    let gallery = builder::write_report(report, &gallery_file, &failures_file)?;

    info!(
        "✓ Gallery of {} face(s) written to {}",
        gallery.len(),
        gallery_file.display()
    );
    Ok(())
}

fn report(outcome: Identification, source: &Path) -> Result<()> {
    match outcome {
        Identification::Match { result, .. } => {
            info!(
                "✓ Seems like {} ({:.2}% match)",
                result.label,
                result.percentage()
            );
            info!("  matched image: {}", result.path.display());
            Ok(())
        }
        Identification::NoFace => {
            anyhow::bail!("No face detected in {}", source.display())
        }
    }
}

fn match_file(cfg: config::Config, image: &Path) -> Result<()> {
    let ctx = AppContext::load(cfg)?;
    let img = image::open(image).with_context(|| format!("opening {}", image.display()))?;
    let outcome = ctx.identify(&img)?;
    report(outcome, image)
}

fn capture(cfg: config::Config, device: Option<String>) -> Result<()> {
    let device = device.unwrap_or_else(|| cfg.camera.clone());
    let ctx = AppContext::load(cfg)?;

    info!("Opening camera: {}", device);
    let mut camera = Camera::open(&device).context("Failed to open camera")?;
    let frame = camera
        .capture(CAMERA_WARMUP_FRAMES)
        .context("Failed to capture frame")?;

    let upload_dir = &ctx.config.artifacts.upload_dir;
    std::fs::create_dir_all(upload_dir)
        .with_context(|| format!("creating {}", upload_dir.display()))?;
    let path = upload_dir.join(format!("captured_{}.jpg", uuid::Uuid::new_v4().simple()));
    frame
        .save(&path)
        .with_context(|| format!("saving {}", path.display()))?;
    info!("Photo captured and saved to {}", path.display());

    let outcome = ctx.identify(&image::DynamicImage::ImageRgb8(frame));
    match outcome {
        Ok(Identification::NoFace) => {
            warn!("No face detected. Try again with better lighting.");
            Ok(())
        }
        other => report(other?, &path),
    }
}

fn serve(cfg: config::Config, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| cfg.server.addr.clone());
    let ctx = Arc::new(AppContext::load(cfg)?);
    info!("Serving {} gallery face(s)", ctx.gallery.len());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?
        .block_on(server::serve(ctx, &addr))
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
