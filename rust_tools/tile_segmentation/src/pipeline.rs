use crate::batch::BatchAccumulator;
use crate::config::PipelineConfig;
use crate::ensemble::{EnsemblePredictor, Tile};
use crate::error::{Result, SegmentationError};
use crate::io::{GdalTileSource, TileSource};
use crate::mosaic::{LabelSink, MosaicWriter};
use crate::nodata::{is_empty_band, is_empty_tile, NodataPolicy, REFERENCE_BAND};
use crate::progress::{CancellationToken, ProgressReporter};
use crate::reclass;
use crate::tiling::TileIndexer;
use crate::trim::OverlapTrimmer;
use crate::warp::{self, WarpProfile};
use log::{debug, info, warn};
use std::path::Path;

/// Counts from one pass over the raster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub tiles_considered: usize,
    pub tiles_skipped_size: usize,
    pub tiles_skipped_nodata: usize,
    pub tiles_written: usize,
    pub batches: usize,
    pub cancelled: bool,
}

fn indexer_for<S: TileSource + ?Sized>(source: &S, config: &PipelineConfig) -> TileIndexer {
    TileIndexer::new(
        source.width(),
        source.height(),
        source.geo_transform(),
        config.tile_size,
        config.stride,
        config.row_margin(),
    )
}

/// Number of tiles a run would write: full-size windows that pass the nodata filter.
///
/// Under [`NodataPolicy::AllEqual`] only the reference band is read.
pub fn count_valid_tiles<S: TileSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
    cancel: &dyn CancellationToken,
) -> Result<usize> {
    info!("Counting tiles with data...");
    let nodata = source.nodata();
    let mut total = 0;

    for (window, _) in indexer_for(source, config) {
        if cancel.is_cancelled() {
            break;
        }
        if !window.is_square_of(config.tile_size) {
            continue;
        }
        let empty = match (nodata, config.nodata_policy) {
            (None, _) => false,
            (Some(_), NodataPolicy::AllEqual) => {
                is_empty_band(source.read_band(REFERENCE_BAND, &window)?.view(), nodata)
            }
            (Some(_), NodataPolicy::Average) => {
                is_empty_tile(source.read_tile(&window)?.view(), nodata, NodataPolicy::Average)
            }
        };
        if !empty {
            total += 1;
        }
    }

    info!("{} tiles to process", total);
    Ok(total)
}

struct BatchWriter<'a, K: LabelSink + ?Sized> {
    ensemble: &'a mut EnsemblePredictor,
    trimmer: OverlapTrimmer,
    reclassify: bool,
    sink: &'a mut K,
    progress: &'a mut dyn ProgressReporter,
}

impl<'a, K: LabelSink + ?Sized> BatchWriter<'a, K> {
    fn process(&mut self, batch: Vec<Tile>, summary: &mut PipelineSummary) -> Result<()> {
        let labels = self.ensemble.predict(&batch)?;
        if labels.len() != batch.len() {
            return Err(SegmentationError::Inference(format!(
                "ensemble returned {} label grids for {} tiles",
                labels.len(),
                batch.len()
            )));
        }

        for (tile, grid) in batch.iter().zip(labels) {
            let (cropped, crop_window) = self.trimmer.trim(&grid, &tile.window)?;
            let cropped = reclass::apply(cropped, self.reclassify)?;
            self.sink.write_labels(&crop_window, &cropped)?;
            summary.tiles_written += 1;
            self.progress.tile_written(crop_window);
        }

        summary.batches += 1;
        debug!("Batch {} done ({} tiles)", summary.batches, batch.len());
        Ok(())
    }
}

/// Tile, filter, batch, infer, trim and write in one sequential pass.
///
/// Only one batch is ever in flight. Cancellation is polled before each tile read and
/// before each batch is inferred; a cancelled run returns `Ok` with `cancelled` set and
/// leaves whatever was already written in `sink`.
pub fn run_pipeline<S, K>(
    source: &S,
    sink: &mut K,
    ensemble: &mut EnsemblePredictor,
    config: &PipelineConfig,
    progress: &mut dyn ProgressReporter,
    cancel: &dyn CancellationToken,
) -> Result<PipelineSummary>
where
    S: TileSource + ?Sized,
    K: LabelSink + ?Sized,
{
    config.validate()?;
    config.warn_on_uneven_coverage();
    let trimmer = config.trimmer()?;

    let nodata = source.nodata();
    let indexer = indexer_for(source, config);
    info!(
        "Tiling {}x{} raster: tile {} stride {} batch {} crop {} ({} candidate windows)",
        source.width(),
        source.height(),
        config.tile_size,
        config.stride,
        config.batch_size,
        config.crop_amount,
        indexer.total_windows()
    );

    let mut summary = PipelineSummary::default();
    let mut accumulator = BatchAccumulator::new(config.batch_size);
    let mut writer = BatchWriter {
        ensemble,
        trimmer,
        reclassify: config.reclassify,
        sink,
        progress,
    };

    for (window, transform) in indexer {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        summary.tiles_considered += 1;

        if !window.is_square_of(config.tile_size) {
            summary.tiles_skipped_size += 1;
            continue;
        }

        let image = source.read_tile(&window)?;
        if is_empty_tile(image.view(), nodata, config.nodata_policy) {
            summary.tiles_skipped_nodata += 1;
            continue;
        }
        debug!(
            "Tile ({},{}) origin ({:.3}, {:.3})",
            window.col_off, window.row_off, transform.0[0], transform.0[3]
        );

        if let Some(batch) = accumulator.push(Tile { window, image }) {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            writer.process(batch, &mut summary)?;
        }
    }

    if !summary.cancelled {
        if let Some(batch) = accumulator.finish() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
            } else {
                writer.process(batch, &mut summary)?;
            }
        }
    }

    if summary.cancelled {
        warn!("Cancelled after writing {} tiles", summary.tiles_written);
    } else {
        info!(
            "Wrote {} tiles in {} batches ({} skipped as nodata, {} clipped at edges)",
            summary.tiles_written, summary.batches, summary.tiles_skipped_nodata, summary.tiles_skipped_size
        );
    }
    Ok(summary)
}

/// Open `input`, reading through a `gdalwarp` VRT when `warp` changes the grid.
pub fn open_view(input: &Path, output: &Path, warp: Option<&WarpProfile>) -> Result<GdalTileSource> {
    match warp {
        Some(profile) if !profile.is_identity() => {
            let vrt_path = warp::vrt_path_for(output);
            warp::build_warped_vrt(input, &vrt_path, profile)?;
            GdalTileSource::open(&vrt_path)
        }
        _ => GdalTileSource::open(input),
    }
}

/// Run the pipeline into a new GeoTIFF at `output`.
///
/// Configuration is validated before the file is created. The mosaic is closed on every
/// exit path, keeping the partial result when inference or I/O fails midway.
pub fn predict_to_file(
    source: &GdalTileSource,
    output: &Path,
    creation_options: Vec<String>,
    ensemble: &mut EnsemblePredictor,
    config: &PipelineConfig,
    progress: &mut dyn ProgressReporter,
    cancel: &dyn CancellationToken,
) -> Result<PipelineSummary> {
    config.validate()?;

    let mut writer = MosaicWriter::create(output, source.metadata(), creation_options)?;
    let outcome = run_pipeline(source, &mut writer, ensemble, config, progress, cancel);
    let closed = writer.close();

    let summary = outcome?;
    closed?;
    Ok(summary)
}
