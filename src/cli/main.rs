//! Inpainting client CLI
//!
//! Resolves a backend endpoint, runs one edit against it and writes the
//! result next to the input (or wherever `--output` points).

use super::config::CliConfigBuilder;
use crate::{
    backend::{BackendClient, ImageOperations},
    config::ClientConfig,
    connection::{share_link, ConnectionResolver, FileOverrideStore, OverrideStore},
    orchestrator::JobOrchestrator,
    raster::Mask,
    services::create_cli_observer,
    session::{EditingSession, ImageOperation, MaskOperation, SourceImage},
    shapes::Shape,
    tracing_config::{events, spans},
    types::{ImagePayload, OutpaintExtents},
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};
use tracing::Instrument;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff"];

/// Mask-based object removal against a remote inpainting backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "inpaint-client")]
pub struct Cli {
    /// Backend endpoint or share link; takes priority over any saved endpoint
    #[arg(long, global = true, value_name = "URL")]
    pub api: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Backend quality preset
    #[arg(long, global = true, value_enum, default_value_t = CliQuality::High)]
    pub quality: CliQuality,

    /// Cap the mask width, scaling shapes to match
    #[arg(long, global = true, value_name = "PIXELS")]
    pub max_width: Option<u32>,

    /// Show a spinner while jobs run
    #[arg(long, global = true)]
    pub progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliQuality {
    Fast,
    Balanced,
    High,
}

/// Where the mask comes from
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct MaskSource {
    /// Binary mask image (white = remove)
    #[arg(long, value_name = "PNG")]
    pub mask: Option<PathBuf>,

    /// JSON array of shapes in image coordinates
    #[arg(long, value_name = "JSON")]
    pub shapes: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Remove the masked region and fill it in
    Inpaint {
        input: PathBuf,
        #[command(flatten)]
        source: MaskSource,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Detect the main subject and write its mask
    AutoMask {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Snap a rough mask to object edges
    RefineEdges {
        input: PathBuf,
        #[command(flatten)]
        source: MaskSource,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Make the background transparent
    RemoveBg {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Put the subject on a new background
    ReplaceBg {
        input: PathBuf,
        background: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Extend the canvas and fill the border
    Outpaint {
        input: PathBuf,
        #[arg(long, default_value_t = 50)]
        left: u32,
        #[arg(long, default_value_t = 50)]
        right: u32,
        #[arg(long, default_value_t = 50)]
        top: u32,
        #[arg(long, default_value_t = 50)]
        bottom: u32,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inpaint many images at once; the backend returns a zip archive
    Batch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "results.zip")]
        output: PathBuf,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },
    /// Resolve and probe the backend, then print its status
    Probe,
    /// Probe a new endpoint and remember it on success
    Connect { url: String },
    /// Forget the saved endpoint
    Disconnect,
    /// Print a link that opens the client against the active endpoint
    ShareLink {
        #[arg(long, default_value = "http://localhost:3000")]
        origin: String,
    },
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    crate::tracing_config::init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let client = BackendClient::new(&config.default_endpoint, &config)?;
    let store = FileOverrideStore::default_location()?;

    match run(&cli, &config, client, store).await {
        Ok(()) => Ok(()),
        Err(e) => {
            events::error_with_context(&*e, "inpaint-client");
            Err(e)
        },
    }
}

async fn run(
    cli: &Cli,
    config: &ClientConfig,
    client: BackendClient,
    store: FileOverrideStore,
) -> Result<()> {
    match &cli.command {
        Command::Disconnect => {
            store.clear().context("Failed to clear saved endpoint")?;
            println!("Saved endpoint cleared; using {}", config.default_endpoint);
            Ok(())
        },
        Command::Connect { url } => {
            let mut resolver = ConnectionResolver::new(client, store, config);
            let state = resolver
                .reconfigure(url)
                .instrument(spans::probe(url))
                .await
                .with_context(|| format!("Could not reach {}", url))?;
            println!("{} ({})", state.endpoint, state.status_label());
            Ok(())
        },
        command => {
            let link_param = CliConfigBuilder::link_param(cli);
            let mut resolver = ConnectionResolver::new(client.clone(), store, config);
            let span = spans::probe(link_param.as_deref().unwrap_or(&config.default_endpoint));
            let state = resolver
                .initialize(link_param.as_deref())
                .instrument(span)
                .await
                .clone();

            match command {
                Command::Probe => {
                    println!("{} ({})", state.endpoint, state.status_label());
                    return Ok(());
                },
                Command::ShareLink { origin } => {
                    println!("{}", share_link(origin, &state.endpoint)?);
                    return Ok(());
                },
                _ => {},
            }

            if !state.is_online() {
                bail!("Backend offline ({})", state.endpoint);
            }
            events::progress(&format!(
                "Connected to {} ({})",
                state.endpoint,
                state.status_label()
            ));

            let backend = client.with_base_url(&state.endpoint);
            run_edit(cli, config, &backend, command).await
        },
    }
}

async fn run_edit(
    cli: &Cli,
    config: &ClientConfig,
    backend: &BackendClient,
    command: &Command,
) -> Result<()> {
    match command {
        Command::Inpaint { input, source, output } => {
            let mut session = open_session(input, config)?;
            apply_mask_source(&mut session, source)?;

            let observer = create_cli_observer(
                cli.progress,
                cli.verbose > 0,
                "inpaint",
                config.retry.max_consecutive_failures,
            );
            let orchestrator = JobOrchestrator::new(config.retry);
            session
                .run_inpaint(&orchestrator, backend, observer.as_ref())
                .instrument(spans::job("inpaint", input))
                .await
                .context("Inpaint failed")?;

            let out = output.clone().unwrap_or_else(|| derive_output(input, "inpainted", "png"));
            write_output(&out, &session.current_image().payload().bytes)
        },
        Command::AutoMask { input, output } => {
            let mut session = open_session(input, config)?;
            session
                .run_mask_operation(backend, MaskOperation::AutoDetect)
                .instrument(spans::job("auto-mask", input))
                .await
                .context("Auto-mask failed")?;
            let out = output.clone().unwrap_or_else(|| derive_output(input, "mask", "png"));
            write_mask(&out, session.mask())
        },
        Command::RefineEdges { input, source, output } => {
            let mut session = open_session(input, config)?;
            apply_mask_source(&mut session, source)?;
            session
                .run_mask_operation(backend, MaskOperation::RefineEdges)
                .instrument(spans::job("refine-edges", input))
                .await
                .context("Refine edges failed")?;
            let out = output.clone().unwrap_or_else(|| derive_output(input, "refined", "png"));
            write_mask(&out, session.mask())
        },
        Command::RemoveBg { input, output } => {
            run_image_operation(
                config,
                backend,
                input,
                ImageOperation::RemoveBackground,
                "nobg",
                output.as_deref(),
            )
            .await
        },
        Command::ReplaceBg { input, background, output } => {
            let background = SourceImage::open(background)
                .with_context(|| format!("Failed to read background {}", background.display()))?;
            let operation = ImageOperation::ReplaceBackground(background.payload().clone());
            run_image_operation(config, backend, input, operation, "newbg", output.as_deref()).await
        },
        Command::Outpaint {
            input,
            left,
            right,
            top,
            bottom,
            output,
        } => {
            let extents = OutpaintExtents {
                left: *left,
                right: *right,
                top: *top,
                bottom: *bottom,
            };
            if extents.is_empty() {
                bail!("At least one side must be extended");
            }
            run_image_operation(
                config,
                backend,
                input,
                ImageOperation::Outpaint(extents),
                "outpaint",
                output.as_deref(),
            )
            .await
        },
        Command::Batch {
            inputs,
            output,
            recursive,
        } => run_batch(cli, backend, inputs, output, *recursive).await,
        Command::Probe
        | Command::Connect { .. }
        | Command::Disconnect
        | Command::ShareLink { .. } => Ok(()),
    }
}

async fn run_image_operation(
    config: &ClientConfig,
    backend: &BackendClient,
    input: &Path,
    operation: ImageOperation,
    suffix: &str,
    output: Option<&Path>,
) -> Result<()> {
    let mut session = open_session(input, config)?;
    session
        .run_image_operation(backend, operation)
        .instrument(spans::job(suffix, input))
        .await
        .with_context(|| format!("Operation on {} failed", input.display()))?;

    let out = output.map_or_else(|| derive_output(input, suffix, "png"), Path::to_path_buf);
    write_output(&out, &session.current_image().payload().bytes)
}

async fn run_batch(
    cli: &Cli,
    backend: &BackendClient,
    inputs: &[PathBuf],
    output: &Path,
    recursive: bool,
) -> Result<()> {
    let files = collect_inputs(inputs, recursive)?;
    if files.is_empty() {
        bail!("No image files found");
    }

    let span = spans::batch(files.len());
    async {
        let reads = files.iter().map(|path| async move {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("image.png");
            Ok::<_, anyhow::Error>(ImagePayload::from_named_bytes(name, bytes))
        });
        let payloads = futures::future::try_join_all(reads).await?;

        info!("Uploading {} images", payloads.len());
        let archive = backend
            .batch_inpaint(&payloads, cli.quality.into())
            .await
            .context("Batch request failed")?;
        write_output(output, &archive)
    }
    .instrument(span)
    .await
}

fn open_session(input: &Path, config: &ClientConfig) -> Result<EditingSession> {
    let image = SourceImage::open(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (width, height) = image.dimensions();
    info!("Loaded {} ({}x{})", input.display(), width, height);
    Ok(EditingSession::new(image, config))
}

fn apply_mask_source(session: &mut EditingSession, source: &MaskSource) -> Result<()> {
    if let Some(path) = &source.mask {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read mask {}", path.display()))?;
        let mask = Mask::from_png(&bytes).context("Mask is not a readable image")?;
        session.set_mask(mask);
    } else if let Some(path) = &source.shapes {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read shapes {}", path.display()))?;
        let shapes: Vec<Shape> =
            serde_json::from_str(&json).context("Shapes file is not a valid shape list")?;
        let total = shapes.len();
        let kept = session.shapes_mut().extend_committed(shapes);
        if kept < total {
            warn!("Ignored {} degenerate shapes", total - kept);
        }
    }
    Ok(())
}

fn collect_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let depth = if recursive { usize::MAX } else { 1 };
            let walker = walkdir::WalkDir::new(input).max_depth(depth);
            for entry in walker {
                let entry = entry?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// `photo.jpg` -> `photo_<suffix>.<ext>` in the same directory
fn derive_output(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    input.with_file_name(format!("{}_{}.{}", stem, suffix, extension))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    events::progress(&format!("Saved {}", path.display()));
    Ok(())
}

fn write_mask(path: &Path, mask: Option<&Mask>) -> Result<()> {
    let mask = mask.context("Backend returned no mask")?;
    write_output(path, &mask.to_png()?)
}
