use crate::config::{load_config, ModelSelection, PipelineConfig};
use crate::error::Result;
use crate::model::ModelSpec;
use crate::nodata::NodataPolicy;
use crate::warp::{Resampling, WarpProfile};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tile-segment")]
#[command(about = "Tiled ensemble segmentation of large multi-band rasters into a label mosaic")]
#[command(version)]
pub struct Args {
    /// Input GeoTIFF path (4-band imagery)
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Output GeoTIFF path (single-band uint8 labels, nodata 255)
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// JSON pipeline config; flags below override it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Ensemble member, repeatable (e.g. model_1=models/model_1.onnx)
    #[arg(short, long = "model", value_name = "NAME=PATH")]
    pub models: Vec<ModelSpec>,

    /// Use only the named model instead of averaging all of them
    #[arg(long, value_name = "NAME")]
    pub only: Option<String>,

    /// Tile edge length in pixels [default: 256]
    #[arg(long, value_name = "PIXELS")]
    pub tile_size: Option<usize>,

    /// Distance between tile origins in pixels [default: 128]
    #[arg(long, value_name = "PIXELS")]
    pub stride: Option<usize>,

    /// Tiles per inference call, 1-16 [default: 4]
    #[arg(short, long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Border discarded from each side of a predicted tile [default: 64]
    #[arg(long, value_name = "PIXELS")]
    pub crop_amount: Option<usize>,

    /// Row offsets stop this far above the bottom edge [default: tile size - stride]
    #[arg(long, value_name = "PIXELS")]
    pub row_margin: Option<usize>,

    /// Map model classes to coarse domain codes
    #[arg(long)]
    pub reclassify: bool,

    /// Skip tiles whose mean equals nodata rather than tiles whose reference band is all nodata
    #[arg(long)]
    pub average_nodata: bool,

    /// Reproject the input to this CRS before tiling (e.g. EPSG:2230)
    #[arg(long, value_name = "CRS")]
    pub target_crs: Option<String>,

    /// Resample the input to this pixel size before tiling
    #[arg(long, value_name = "SIZE")]
    pub target_resolution: Option<f64>,

    /// Resampling used by the reprojected view
    #[arg(long, value_enum, default_value_t = Resampling::Nearest)]
    pub resampling: Resampling,

    /// Compression type (DEFLATE, LZW, ZSTD, NONE)
    #[arg(long, value_name = "TYPE", default_value = "DEFLATE")]
    pub compress: String,

    /// Output block size (must be multiple of 16)
    #[arg(long, value_name = "PIXELS", default_value_t = 256)]
    pub block_size: usize,

    /// Accept rasters outside the default band/type/CRS/resolution ranges
    #[arg(long)]
    pub skip_validation: bool,

    /// Skip the tile pre-count; progress is logged instead of drawn as a bar
    #[arg(long)]
    pub no_estimate: bool,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let base = match &self.config {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };
        Ok(self.apply(base))
    }

    pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(v) = self.tile_size {
            config.tile_size = v;
        }
        if let Some(v) = self.stride {
            config.stride = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.crop_amount {
            config.crop_amount = v;
        }
        if self.row_margin.is_some() {
            config.row_margin = self.row_margin;
        }
        if self.reclassify {
            config.reclassify = true;
        }
        if self.average_nodata {
            config.nodata_policy = NodataPolicy::Average;
        }
        if !self.models.is_empty() {
            config.models = self.models.clone();
        }
        if let Some(name) = &self.only {
            config.selection = ModelSelection::Only(name.clone());
        }
        if self.target_crs.is_some() || self.target_resolution.is_some() {
            config.warp = Some(WarpProfile {
                target_crs: self.target_crs.clone(),
                resolution: self.target_resolution,
                resampling: self.resampling,
            });
        }
        config
    }
}
