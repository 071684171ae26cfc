// Library exports for testing and reuse

pub mod batch;
pub mod cli;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod model;
pub mod mosaic;
pub mod nodata;
pub mod pipeline;
pub mod progress;
pub mod reclass;
pub mod tiling;
pub mod trim;
pub mod warp;

// Re-export commonly used types
pub use config::{ModelSelection, PipelineConfig};
pub use ensemble::EnsemblePredictor;
pub use error::{Result, SegmentationError};
pub use io::{GdalTileSource, InputRequirements, TileSource};
pub use model::{ModelSpec, OnnxModel, SegmentationModel};
pub use mosaic::{LabelSink, MosaicWriter};
pub use pipeline::{count_valid_tiles, predict_to_file, run_pipeline, PipelineSummary};
pub use progress::{CancellationToken, ProgressReporter};
pub use tiling::{GeoTransform, TileIndexer, Window};
