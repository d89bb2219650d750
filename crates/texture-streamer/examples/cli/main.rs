//! Texture streaming CLI
//!
//! Loads the textures listed in a manifest onto the GPU (or the headless
//! software device) and prints what became resident.
//!
//! # Usage
//! ```bash
//! cargo run --example cli -- --manifest assets/textures.yaml MageDiffuseFire
//! cargo run --example cli -- --config loader.yaml --all --parallel --verify
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;
use texture_streamer::{
    ContainerDecoder, DdsDecoder, DecodedTexture, LoadReport, LoaderConfig, SoftwareBackend, TextureDesc, TextureError, TextureRegistry, UploadBackend, WgpuBackend,
    WorkerPool, compute_footprints,
};

/// Command-line arguments for the texture streamer
#[derive(Parser)]
#[command(version, about = "Stream DDS textures listed in a manifest onto the GPU")]
struct Args {
    /// Logical names to load (file names without extension)
    names: Vec<String>,

    /// Loader configuration file (YAML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Texture manifest, overriding the configuration
    #[arg(long, short)]
    manifest: Option<PathBuf>,

    /// Load every texture in the manifest
    #[arg(long, short)]
    all: bool,

    /// Decode containers on a worker pool
    #[arg(long, short)]
    parallel: bool,

    /// Decode worker count (defaults to one per core)
    #[arg(long, short)]
    threads: Option<usize>,

    /// Create textures with SRGB formats
    #[arg(long)]
    force_srgb: bool,

    /// Use the headless software device instead of a GPU
    #[arg(long)]
    software: bool,

    /// Read mip 0 of every loaded texture back and compare it with the container
    #[arg(long)]
    verify: bool,

    /// Log every pipeline stage
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(manifest) = &args.manifest {
        config.manifest_path = manifest.clone();
    }
    config.force_srgb |= args.force_srgb;
    if args.threads.is_some() {
        config.worker_threads = args.threads;
    }

    let decoder = DdsDecoder::from_config(&config);
    let failed = if args.software {
        let mut registry = TextureRegistry::open(SoftwareBackend::new(), decoder, config)?;
        let report = load(&mut registry, &args)?;
        if args.verify {
            for name in &report.loaded {
                let decoded = decode_again(&registry, name)?;
                let texture = registry.get(name).ok_or_else(|| TextureError::NotFound(name.clone()))?;
                let actual = registry.backend().read_subresource(texture.resource(), 0).unwrap_or_default();
                check(name, &decoded, &actual);
            }
        }
        summarize(&registry, &report)
    } else {
        println!("Initializing GPU...");
        let backend = pollster::block_on(WgpuBackend::request())?;
        let mut registry = TextureRegistry::open(backend, decoder, config)?;
        let report = load(&mut registry, &args)?;
        if args.verify {
            for name in &report.loaded {
                let decoded = decode_again(&registry, name)?;
                let texture = registry.get(name).ok_or_else(|| TextureError::NotFound(name.clone()))?;
                let desc = TextureDesc::from_metadata(decoded.metadata(), registry.config().force_srgb)?;
                let footprints = compute_footprints(&desc, &registry.backend().layout_limits())?;
                let Some(footprint) = footprints.get(0) else { continue };
                let actual = registry.backend().read_subresource(texture.resource(), footprint)?;
                check(name, &decoded, &actual);
            }
        }
        summarize(&registry, &report)
    };

    if failed > 0 {
        return Err(format!("{failed} texture(s) failed to load").into());
    }
    Ok(())
}

/// Loads what the arguments ask for
fn load<B: UploadBackend>(registry: &mut TextureRegistry<B, DdsDecoder>, args: &Args) -> Result<LoadReport, TextureError> {
    let names: Vec<String> = if args.all || args.names.is_empty() {
        registry.names().into_iter().map(String::from).collect()
    } else {
        args.names.clone()
    };

    if args.parallel {
        let pool = WorkerPool::new(registry.config().worker_threads)?;
        println!("Decoding {} texture(s) on {} worker(s)", names.len(), pool.threads());
        return Ok(registry.load_parallel(names.as_slice(), &pool));
    }

    let mut report = LoadReport::default();
    for name in names {
        match registry.load(&name) {
            Ok(_) => report.loaded.push(name),
            Err(e) => report.failed.push((name, e)),
        }
    }
    Ok(report)
}

/// Decodes the named texture's container again for comparison
fn decode_again<B: UploadBackend>(registry: &TextureRegistry<B, DdsDecoder>, name: &str) -> Result<DecodedTexture, TextureError> {
    let path = registry.path(name).ok_or_else(|| TextureError::NotFound(name.to_string()))?;
    DdsDecoder::from_config(registry.config()).decode(Path::new(path))
}

/// Compares mip 0 of the first slice, every depth layer of it, with what the device holds
fn check(name: &str, decoded: &DecodedTexture, actual: &[u8]) {
    let expected = decoded.subresource_bytes(0, 0).unwrap_or_default();
    if expected == actual {
        println!("  {name}: mip 0 verified ({} bytes)", actual.len());
    } else {
        let first_difference = expected.iter().zip(actual).position(|(a, b)| a != b);
        tracing::error!(name, expected = expected.len(), actual = actual.len(), ?first_difference, "mip 0 mismatch");
    }
}

/// Prints the resident textures and failures, returning the failure count
fn summarize<B: UploadBackend>(registry: &TextureRegistry<B, DdsDecoder>, report: &LoadReport) -> usize {
    for name in &report.loaded {
        if let Some(texture) = registry.get(name) {
            println!(
                "{name}: {}x{}x{} {:?} ({} mips, {} slices{}) in view slot {}",
                texture.width(),
                texture.height(),
                texture.depth(),
                texture.format(),
                texture.mip_count(),
                texture.array_size(),
                if texture.is_cubemap() { ", cubemap" } else { "" },
                texture.view().index()
            );
        }
    }
    for (name, error) in &report.failed {
        eprintln!("{name}: {error}");
    }

    println!(
        "{} of {} texture(s) resident, {} upload(s) still in flight",
        registry.resident_count(),
        registry.len(),
        registry.staging_in_flight()
    );
    report.failed.len()
}
