use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::time::Instant;

use tile_segmentation::cli::Args;
use tile_segmentation::io::{validate_input, GdalTileSource, InputRequirements};
use tile_segmentation::mosaic::creation_options;
use tile_segmentation::pipeline::{count_valid_tiles, open_view, predict_to_file};
use tile_segmentation::progress::{LogProgress, NeverCancel, ProgressReporter};
use tile_segmentation::{EnsemblePredictor, Result, SegmentationError, Window};

const LOG_EVERY_TILES: usize = 100;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Tiled Segmentation ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| SegmentationError::Configuration(format!("thread pool: {}", e)))?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    let config = args.pipeline_config()?;
    config.validate()?;
    let options = creation_options(&args.compress, args.block_size)?;
    let mut ensemble = EnsemblePredictor::from_specs(&config.models, &config.selection)?;

    if args.skip_validation {
        warn!("Skipping input validation");
    } else {
        let raw = GdalTileSource::open(&args.input)?;
        validate_input(raw.metadata(), &InputRequirements::default())?;
    }

    let source = open_view(&args.input, &args.output, config.warp.as_ref())?;
    let meta = source.metadata();
    info!("Raster size: {}x{}", meta.width, meta.height);
    let (xres, yres) = meta.resolution();
    info!("Pixel size: {:.6} x {:.6}", xres, yres);
    match meta.nodata {
        Some(nd) => info!("Using nodata value: {}", nd),
        None => warn!("Input has no nodata value; every full-size tile will be inferred"),
    }

    info!("Loading models...");
    ensemble.load_all()?;

    let total = if args.no_estimate {
        None
    } else {
        Some(count_valid_tiles(&source, &config, &NeverCancel)?)
    };

    // Bar when the tile total is known, periodic log lines otherwise.
    let bar = total.map(|n| {
        let bar = ProgressBar::new(n as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message("Processing tiles...");
        bar
    });
    let mut bar_progress = |_window: Window| {
        if let Some(bar) = &bar {
            bar.inc(1);
        }
    };
    let mut log_progress = LogProgress::new(None, LOG_EVERY_TILES);
    let progress: &mut dyn ProgressReporter = if bar.is_some() {
        &mut bar_progress
    } else {
        &mut log_progress
    };

    let start = Instant::now();
    let summary = predict_to_file(
        &source,
        &args.output,
        options,
        &mut ensemble,
        &config,
        progress,
        &NeverCancel,
    )?;
    if let Some(bar) = &bar {
        bar.finish_with_message("Done");
    }

    info!(
        "Wrote {} tiles ({} nodata tiles skipped) in {:.1?}",
        summary.tiles_written,
        summary.tiles_skipped_nodata,
        start.elapsed()
    );
    info!("=== Done! ===");
    Ok(())
}
