use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};
use wasm_registry::{ImageReference, PullConfig, WasmImage, WasmRegistry};

#[derive(Parser)]
#[command(name = "wasm-registry")]
#[command(version, about = "Pull WebAssembly modules from OCI registries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull a WASM image and print the path of the verified module
    Pull(PullArgs),

    /// Push a WASM module to a registry (not supported)
    Push(PushArgs),

    /// Show how an image reference is resolved (no network access)
    Inspect(InspectArgs),
}

#[derive(Parser)]
struct PullArgs {
    /// Image reference: [registry/]repository[:tag][@sha256:hash]
    #[arg(value_name = "IMAGE")]
    image: String,

    /// Directory to store modules in (default: $WASM_REGISTRY_WORKDIR or .wasm)
    #[arg(short, long, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// Reach this registry over plain HTTP (repeatable)
    #[arg(long = "insecure-registry", value_name = "HOST")]
    insecure_registries: Vec<String>,
}

#[derive(Parser)]
struct PushArgs {
    /// The WASM module to push
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Target image reference
    #[arg(value_name = "IMAGE")]
    image: String,
}

#[derive(Parser)]
struct InspectArgs {
    /// Image reference to resolve
    #[arg(value_name = "IMAGE")]
    image: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    runtime()?.block_on(async {
        match cli.command {
            Commands::Pull(args) => pull(args).await,
            Commands::Push(args) => push(args).await,
            Commands::Inspect(args) => inspect(args),
        }
    })
}

fn registry_config(workdir: Option<PathBuf>, insecure: &[String]) -> PullConfig {
    let mut config = PullConfig::from_env();
    if let Some(workdir) = workdir {
        config = config.with_workdir(workdir);
    }
    for host in insecure {
        config = config.with_insecure_registry(host);
    }
    config
}

async fn pull(args: PullArgs) -> Result<()> {
    tracing::debug!("executing pull command");

    let config = registry_config(args.workdir, &args.insecure_registries);
    let registry = WasmRegistry::with_config(config);
    let wasm = registry
        .pull(&args.image)
        .await
        .with_context(|| format!("failed to pull {}", args.image))?;

    println!("{}", wasm.file.display());
    Ok(())
}

async fn push(args: PushArgs) -> Result<()> {
    tracing::debug!("executing push command");

    let image = ImageReference::parse(&args.image)?;
    let registry = WasmRegistry::with_config(PullConfig::from_env());
    registry
        .push(&WasmImage::new(image, args.file))
        .await
        .with_context(|| format!("failed to push {}", args.image))
}

fn inspect(args: InspectArgs) -> Result<()> {
    let image = ImageReference::parse(&args.image)?;

    println!("image:     {image}");
    println!("registry:  {}", image.registry());
    println!("name:      {}", image.repository());
    println!("reference: {}", image.reference());
    println!("file:      {}", image.file_name());
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
