use crate::ensemble::TILE_BANDS;
use crate::error::{Result, SegmentationError};
use crate::tiling::{GeoTransform, Window};
use gdal::raster::{GdalDataType, RasterBand};
use gdal::Dataset;
use log::{debug, info};
use ndarray::{s, Array2, Array3};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    UInt8,
    UInt16,
    Other,
}

impl From<GdalDataType> for SampleType {
    fn from(value: GdalDataType) -> Self {
        match value {
            GdalDataType::UInt8 => SampleType::UInt8,
            GdalDataType::UInt16 => SampleType::UInt16,
            _ => SampleType::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub sample_type: SampleType,
    pub geotransform: GeoTransform,
    pub projection: String,
    pub epsg: Option<i32>,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    pub fn resolution(&self) -> (f64, f64) {
        self.geotransform.resolution()
    }
}

/// Extract metadata from a dataset without reading pixels
pub fn extract_metadata_from_dataset(dataset: &Dataset) -> Result<RasterMetadata> {
    let rasterband: RasterBand = dataset.rasterband(1)?;

    let width = rasterband.x_size() as usize;
    let height = rasterband.y_size() as usize;

    if width == 0 || height == 0 {
        return Err(SegmentationError::InputValidation(format!(
            "raster has invalid dimensions {}x{}",
            width, height
        )));
    }

    let geotransform = GeoTransform(dataset.geo_transform()?);
    let epsg = dataset
        .spatial_ref()
        .ok()
        .and_then(|srs| srs.auth_code().ok());

    Ok(RasterMetadata {
        width,
        height,
        band_count: dataset.raster_count() as usize,
        sample_type: SampleType::from(rasterband.band_type()),
        geotransform,
        projection: dataset.projection(),
        epsg,
        nodata: rasterband.no_data_value(),
    })
}

/// Acceptance ranges for input imagery.
#[derive(Debug, Clone)]
pub struct InputRequirements {
    pub min_bands: usize,
    pub sample_types: Vec<SampleType>,
    pub epsg_codes: Vec<i32>,
    /// Expected pixel size in CRS units.
    pub resolution: f64,
    /// Relative tolerance on `resolution`.
    pub resolution_tolerance: f64,
}

impl Default for InputRequirements {
    fn default() -> Self {
        // California State Plane Zone 6 (US feet), half-foot imagery.
        Self {
            min_bands: TILE_BANDS,
            sample_types: vec![SampleType::UInt8, SampleType::UInt16],
            epsg_codes: vec![2230, 2875],
            resolution: 0.5,
            resolution_tolerance: 0.01,
        }
    }
}

pub fn validate_input(metadata: &RasterMetadata, requirements: &InputRequirements) -> Result<()> {
    if metadata.band_count < requirements.min_bands {
        return Err(SegmentationError::InputValidation(format!(
            "input raster must have at least {} bands, found {}",
            requirements.min_bands, metadata.band_count
        )));
    }

    if !requirements.sample_types.contains(&metadata.sample_type) {
        return Err(SegmentationError::InputValidation(format!(
            "unsupported sample type {:?}, expected one of {:?}",
            metadata.sample_type, requirements.sample_types
        )));
    }

    match metadata.epsg {
        Some(code) if requirements.epsg_codes.contains(&code) => {}
        other => {
            return Err(SegmentationError::InputValidation(format!(
                "coordinate reference {} is not one of EPSG {:?}",
                other.map_or_else(|| "unknown".to_string(), |c| format!("EPSG:{}", c)),
                requirements.epsg_codes
            )));
        }
    }

    let (xres, yres) = metadata.resolution();
    let tolerance = requirements.resolution * requirements.resolution_tolerance;
    if (xres - requirements.resolution).abs() >= tolerance
        || (yres - requirements.resolution).abs() >= tolerance
    {
        return Err(SegmentationError::InputValidation(format!(
            "resolution must be {}, found ({:.4}, {:.4})",
            requirements.resolution, xres, yres
        )));
    }

    Ok(())
}

/// Windowed multi-band reads of the imagery being segmented.
pub trait TileSource {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn geo_transform(&self) -> GeoTransform;

    fn nodata(&self) -> Option<f64>;

    /// Bands `1..=TILE_BANDS` inside `window`, shaped (bands, rows, cols).
    fn read_tile(&self, window: &Window) -> Result<Array3<f32>>;

    /// One zero-based band inside `window`, shaped (rows, cols).
    fn read_band(&self, band: usize, window: &Window) -> Result<Array2<f32>>;
}

/// GDAL dataset opened for reading.
pub struct GdalTileSource {
    dataset: Dataset,
    metadata: RasterMetadata,
}

impl GdalTileSource {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening input raster: {}", path.display());
        let dataset = Dataset::open(path)?;
        let metadata = extract_metadata_from_dataset(&dataset)?;

        debug!("Raster dimensions: {}x{}", metadata.width, metadata.height);
        debug!(
            "Bands: {}, sample type: {:?}, EPSG: {:?}, nodata: {:?}",
            metadata.band_count, metadata.sample_type, metadata.epsg, metadata.nodata
        );

        Ok(Self { dataset, metadata })
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_band_values(&self, band: usize, window: &Window) -> Result<Vec<f32>> {
        let size = (window.width, window.height);
        let buffer = self.dataset.rasterband(band + 1)?.read_as::<f32>(
            (window.col_off as isize, window.row_off as isize),
            size,
            size,
            None,
        )?;
        Ok(buffer.into_iter().collect())
    }
}

impl TileSource for GdalTileSource {
    fn width(&self) -> usize {
        self.metadata.width
    }

    fn height(&self) -> usize {
        self.metadata.height
    }

    fn geo_transform(&self) -> GeoTransform {
        self.metadata.geotransform
    }

    fn nodata(&self) -> Option<f64> {
        self.metadata.nodata
    }

    fn read_tile(&self, window: &Window) -> Result<Array3<f32>> {
        if self.metadata.band_count < TILE_BANDS {
            return Err(SegmentationError::InputValidation(format!(
                "need {} bands to build a tile, raster has {}",
                TILE_BANDS, self.metadata.band_count
            )));
        }

        let mut data = Vec::with_capacity(TILE_BANDS * window.width * window.height);
        for band in 0..TILE_BANDS {
            data.extend(self.read_band_values(band, window)?);
        }

        Ok(Array3::from_shape_vec(
            (TILE_BANDS, window.height, window.width),
            data,
        )?)
    }

    fn read_band(&self, band: usize, window: &Window) -> Result<Array2<f32>> {
        let data = self.read_band_values(band, window)?;
        Ok(Array2::from_shape_vec((window.height, window.width), data)?)
    }
}

/// Imagery held in memory as (bands, rows, cols).
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub image: Array3<f32>,
    pub nodata: Option<f64>,
    pub transform: GeoTransform,
}

impl MemorySource {
    pub fn new(image: Array3<f32>, nodata: Option<f64>) -> Self {
        Self {
            image,
            nodata,
            transform: GeoTransform::default(),
        }
    }

    fn check_window(&self, min_bands: usize, window: &Window) -> Result<()> {
        let (bands, height, width) = self.image.dim();
        if bands < min_bands || window.col_end() > width || window.row_end() > height {
            return Err(SegmentationError::InputValidation(format!(
                "window ({},{}) {}x{} outside {}-band {}x{} image",
                window.col_off, window.row_off, window.width, window.height, bands, width, height
            )));
        }
        Ok(())
    }
}

impl TileSource for MemorySource {
    fn width(&self) -> usize {
        self.image.dim().2
    }

    fn height(&self) -> usize {
        self.image.dim().1
    }

    fn geo_transform(&self) -> GeoTransform {
        self.transform
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read_tile(&self, window: &Window) -> Result<Array3<f32>> {
        self.check_window(TILE_BANDS, window)?;
        Ok(self
            .image
            .slice(s![
                ..TILE_BANDS,
                window.row_off..window.row_end(),
                window.col_off..window.col_end()
            ])
            .to_owned())
    }

    fn read_band(&self, band: usize, window: &Window) -> Result<Array2<f32>> {
        self.check_window(band + 1, window)?;
        Ok(self
            .image
            .slice(s![
                band,
                window.row_off..window.row_end(),
                window.col_off..window.col_end()
            ])
            .to_owned())
    }
}
