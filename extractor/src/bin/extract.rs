//! Command line driver for the extractor.
//!
//! Reads a raw little-endian `f32` image (or renders a synthetic star field),
//! runs background estimation and detection, and writes the catalog as JSON
//! lines.
//!
//! ```text
//! extract --input frame.raw --width 4096 --height 4096 --output frame.jsonl
//! extract --synthetic 50 --width 512 --height 512 --output field.jsonl
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use extractor::diagnostics::{CheckImages, Diagnostics, NoDiagnostics};
use extractor::sink::JsonLinesSink;
use extractor::source::{write_raw_f32, ArraySource, RawFileSource};
use extractor::{extract_image, ExtractionConfig, ExtractionSummary};
use log::info;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::image_proc::{add_gaussian_spot, simple_normal_array};
use shared::ImageSize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "extract",
    about = "Single-pass source extraction over raw f32 images",
    long_about = None
)]
struct Args {
    /// Raw little-endian f32 image, row-major
    #[arg(long, conflicts_with = "synthetic")]
    input: Option<PathBuf>,

    /// Render a synthetic field with this many stars instead of reading a file
    #[arg(long)]
    synthetic: Option<usize>,

    /// Image width in pixels
    #[arg(long)]
    width: usize,

    /// Image height in pixels
    #[arg(long)]
    height: usize,

    /// JSON configuration; defaults are used for missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Catalog output (JSON lines)
    #[arg(long, default_value = "catalog.jsonl")]
    output: PathBuf,

    /// Directory for background, subtracted and object check images
    #[arg(long)]
    check_images: Option<PathBuf>,

    /// Seed for the synthetic field
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Also save the synthetic image next to the catalog
    #[arg(long)]
    save_synthetic: bool,
}

/// Noise field with `stars` Gaussian spots at random positions.
fn synthetic_field(size: ImageSize, stars: usize, seed: u64) -> Array2<f64> {
    let mut image = simple_normal_array((size.height, size.width), 1000.0, 10.0, seed);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    for _ in 0..stars {
        let x = rng.random_range(0.0..size.width as f64);
        let y = rng.random_range(0.0..size.height as f64);
        let peak = rng.random_range(100.0..5000.0);
        let sigma = rng.random_range(1.0..2.5);
        add_gaussian_spot(&mut image, x, y, peak, sigma);
    }
    image
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let size = ImageSize::from_width_height(args.width, args.height);

    let config = match &args.config {
        Some(path) => ExtractionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExtractionConfig::default(),
    };

    let mut sink = JsonLinesSink::create(&args.output)
        .with_context(|| format!("creating catalog {}", args.output.display()))?;
    let mut check_images = args
        .check_images
        .as_ref()
        .map(|dir| CheckImages::new(size).with_output(dir, false));
    let mut no_diagnostics = NoDiagnostics;
    let diagnostics: &mut dyn Diagnostics = match check_images.as_mut() {
        Some(images) => images,
        None => &mut no_diagnostics,
    };

    let summary: ExtractionSummary = match (&args.input, args.synthetic) {
        (Some(path), _) => {
            let source = RawFileSource::open(path, size)
                .with_context(|| format!("opening {}", path.display()))?;
            extract_image(source, &config, None, &mut sink, diagnostics)?
        }
        (None, Some(stars)) => {
            let image = synthetic_field(size, stars, args.seed).mapv(|v| v as f32);
            if args.save_synthetic {
                let path = args.output.with_extension("raw");
                write_raw_f32(&path, &image)?;
                info!("Synthetic image written to {}", path.display());
            }
            extract_image(ArraySource::new(image), &config, None, &mut sink, diagnostics)?
        }
        (None, None) => bail!("either --input or --synthetic is required"),
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!(
        "{} objects written to {}",
        sink.written(),
        args.output.display()
    );
    Ok(())
}
