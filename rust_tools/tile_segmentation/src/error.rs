use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Degenerate tile at ({col_off},{row_off}): band {band} has a zero maximum")]
    DegenerateTile {
        col_off: usize,
        row_off: usize,
        band: usize,
    },

    #[error("Invalid input raster: {0}")]
    InputValidation(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Label {label} has no reclassification entry")]
    InvalidLabel { label: u8 },

    #[error("Reprojection failed: {0}")]
    WarpFailed(String),

    #[error("Config file error: {0}")]
    ConfigFile(String),
}

pub type Result<T> = std::result::Result<T, SegmentationError>;
