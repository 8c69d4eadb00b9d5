//! Star-field extraction through the file source, JSON catalog and check
//! images.

use approx::assert_relative_eq;
use extractor::config::FilterConfig;
use extractor::diagnostics::{CheckImages, NoDiagnostics};
use extractor::sink::JsonLinesSink;
use extractor::source::{write_raw_f32, ArraySource, RawFileSource};
use extractor::{extract_image, ExtractionConfig, FinalizedObject, Threshold};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use shared::image_proc::{add_gaussian_spot, simple_normal_array};
use shared::ImageSize;
use tempfile::tempdir;

const SIZE: usize = 256;
const NOISE: f64 = 5.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 5x5 grid of jittered stars on a sloped, noisy background.
fn star_field(seed: u64) -> (Array2<f32>, Vec<(f64, f64)>) {
    let mut image = simple_normal_array((SIZE, SIZE), 0.0, NOISE, seed);
    for ((_, x), v) in image.indexed_iter_mut() {
        *v += 1000.0 + 0.05 * x as f64;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut stars = Vec::new();
    for iy in 0..5 {
        for ix in 0..5 {
            let x = 32.0 + 48.0 * ix as f64 + rng.random_range(-3.0..3.0);
            let y = 32.0 + 48.0 * iy as f64 + rng.random_range(-3.0..3.0);
            add_gaussian_spot(&mut image, x, y, 500.0, 1.5);
            stars.push((x, y));
        }
    }
    (image.mapv(|v| v as f32), stars)
}

fn config() -> ExtractionConfig {
    let mut config = ExtractionConfig::default();
    config.detection.threshold = Threshold::Sigma(5.0);
    config.memory.strip_height = 96;
    config.memory.strip_margin = 8;
    config
}

fn assert_recovers(catalog: &[FinalizedObject], stars: &[(f64, f64)], tolerance: f64) {
    assert_eq!(catalog.len(), stars.len());
    for &(x, y) in stars {
        let nearest = catalog
            .iter()
            .map(|o| ((o.x - x).powi(2) + (o.y - y).powi(2)).sqrt())
            .fold(f64::INFINITY, f64::min);
        assert!(
            nearest < tolerance,
            "star at ({x:.2}, {y:.2}) missed by {nearest:.3}"
        );
    }
}

#[test]
fn test_raw_file_to_json_catalog() {
    init_logging();
    let dir = tempdir().unwrap();
    let (image, stars) = star_field(11);
    let raw_path = dir.path().join("field.raw");
    write_raw_f32(&raw_path, &image).unwrap();

    let size = ImageSize::from_width_height(SIZE, SIZE);
    let source = RawFileSource::open(&raw_path, size).unwrap();
    let catalog_path = dir.path().join("field.jsonl");
    let mut sink = JsonLinesSink::create(&catalog_path).unwrap();
    let summary = extract_image(source, &config(), None, &mut sink, &mut NoDiagnostics).unwrap();

    assert_eq!(summary.emitted, 25);
    assert_relative_eq!(summary.background_sigma, NOISE, max_relative = 0.2);
    assert_relative_eq!(summary.threshold, 5.0 * summary.background_sigma);

    let text = std::fs::read_to_string(&catalog_path).unwrap();
    let records: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 25);
    for (i, r) in records.iter().enumerate() {
        assert_eq!(r["id"], (i + 1) as u64);
        let (x, y) = (r["x"].as_f64().unwrap(), r["y"].as_f64().unwrap());
        let nearest = stars
            .iter()
            .map(|&(sx, sy)| ((sx - x).powi(2) + (sy - y).powi(2)).sqrt())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest < 0.3, "record {i} is {nearest:.3} px from any star");
    }
}

#[test]
fn test_centroids_and_shapes() {
    init_logging();
    let (image, stars) = star_field(23);
    let mut catalog: Vec<FinalizedObject> = Vec::new();
    extract_image(
        ArraySource::new(image),
        &config(),
        None,
        &mut catalog,
        &mut NoDiagnostics,
    )
    .unwrap();

    assert_recovers(&catalog, &stars, 0.3);
    for obj in &catalog {
        assert!(obj.a / obj.b < 1.3, "round star measured a/b {}", obj.a / obj.b);
        assert!(obj.peak > 400.0);
        assert!(obj.flags.is_empty());
    }
}

#[test]
fn test_detection_filter() {
    init_logging();
    let (image, stars) = star_field(37);
    let mut config = config();
    config.detection.filter = Some(FilterConfig {
        fwhm: 3.0,
        size: None,
    });
    let mut catalog: Vec<FinalizedObject> = Vec::new();
    extract_image(
        ArraySource::new(image),
        &config,
        None,
        &mut catalog,
        &mut NoDiagnostics,
    )
    .unwrap();
    assert_recovers(&catalog, &stars, 0.5);
}

#[test]
fn test_emission_is_monotonic_and_repeatable() {
    init_logging();
    let (image, _) = star_field(41);
    let run = |image: Array2<f32>| {
        let mut catalog: Vec<FinalizedObject> = Vec::new();
        extract_image(
            ArraySource::new(image),
            &config(),
            None,
            &mut catalog,
            &mut NoDiagnostics,
        )
        .unwrap();
        catalog
    };
    let first = run(image.clone());
    let second = run(image);

    for pair in first.windows(2) {
        assert!(pair[0].bbox.max_row <= pair[1].bbox.max_row);
    }
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.bbox, b.bbox);
        assert_eq!(a.npix, b.npix);
        assert_eq!(a.id, b.id);
    }
}

#[test]
fn test_local_background_near_zero() {
    init_logging();
    let (image, _) = star_field(53);
    let mut config = config();
    config.detection.local_background = Some(8);
    // Keep enough rows below each object for the annulus.
    config.memory.strip_margin = 24;
    let mut catalog: Vec<FinalizedObject> = Vec::new();
    extract_image(
        ArraySource::new(image),
        &config,
        None,
        &mut catalog,
        &mut NoDiagnostics,
    )
    .unwrap();

    let measured: Vec<_> = catalog.iter().filter_map(|o| o.local_background).collect();
    assert_eq!(measured.len(), catalog.len());
    assert!(measured.iter().filter(|l| l.level != 0.0).count() >= 20);
    for local in measured.iter().filter(|l| l.level != 0.0) {
        assert!(local.level.abs() < 2.0, "residual {}", local.level);
        assert_relative_eq!(local.sigma, NOISE, max_relative = 0.3);
    }
}

#[test]
fn test_check_images() {
    init_logging();
    let dir = tempdir().unwrap();
    let (image, _) = star_field(67);
    let size = ImageSize::of_array(&image);
    let mut check = CheckImages::new(size).with_output(dir.path(), true);
    let mut catalog: Vec<FinalizedObject> = Vec::new();
    extract_image(
        ArraySource::new(image),
        &config(),
        None,
        &mut catalog,
        &mut check,
    )
    .unwrap();

    let footprint_flux: f64 = check.objects_plane().iter().map(|&v| v as f64).sum();
    let catalog_flux: f64 = catalog.iter().map(|o| o.flux).sum();
    assert_relative_eq!(footprint_flux, catalog_flux, max_relative = 1e-3);

    let bg = check.background_plane();
    assert_relative_eq!(bg[[128, 128]] as f64, 1000.0 + 0.05 * 128.0, epsilon = 2.0);
    assert!(dir.path().join("background.raw").exists());
    assert!(dir.path().join("subtracted.raw").exists());
}
