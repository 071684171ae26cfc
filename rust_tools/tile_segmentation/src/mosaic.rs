use crate::error::{Result, SegmentationError};
use crate::io::RasterMetadata;
use crate::tiling::Window;
use gdal::cpl::CslStringList;
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use log::{debug, info};
use ndarray::{s, Array2};
use std::path::Path;

/// Output nodata value; pixels no tile was written to keep it.
pub const OUTPUT_NODATA: u8 = 255;

/// Destination for cropped label grids.
///
/// Windows passed across calls are expected to be disjoint; sinks do not check.
pub trait LabelSink {
    fn write_labels(&mut self, window: &Window, labels: &Array2<u8>) -> Result<()>;
}

fn check_shape(window: &Window, labels: &Array2<u8>) -> Result<()> {
    let (rows, cols) = labels.dim();
    if rows != window.height || cols != window.width {
        return Err(SegmentationError::Configuration(format!(
            "label grid {}x{} does not fit window {}x{} at ({},{})",
            cols, rows, window.width, window.height, window.col_off, window.row_off
        )));
    }
    Ok(())
}

/// Validate compression type
pub fn validate_compression(compression: &str) -> Result<()> {
    let valid_types = ["DEFLATE", "LZW", "ZSTD", "NONE"];
    if !valid_types.contains(&compression) {
        return Err(SegmentationError::Configuration(format!(
            "invalid compression type: {}",
            compression
        )));
    }
    Ok(())
}

/// GTiff creation options for a tiled, compressed mosaic.
pub fn creation_options(compression: &str, block_size: usize) -> Result<Vec<String>> {
    validate_compression(compression)?;
    if block_size == 0 || block_size % 16 != 0 {
        return Err(SegmentationError::Configuration(format!(
            "invalid block size: {} (must be multiple of 16)",
            block_size
        )));
    }
    Ok(vec![
        format!("COMPRESS={}", compression),
        "TILED=YES".to_string(),
        format!("BLOCKXSIZE={}", block_size),
        format!("BLOCKYSIZE={}", block_size),
        "BIGTIFF=IF_SAFER".to_string(),
    ])
}

/// Single-band u8 GeoTIFF covering the full source extent.
pub struct MosaicWriter {
    dataset: Dataset,
    width: usize,
    height: usize,
    tiles_written: usize,
}

impl MosaicWriter {
    pub fn create(path: &Path, metadata: &RasterMetadata, options: Vec<String>) -> Result<Self> {
        info!("Creating output raster: {}", path.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;

        let dataset = if options.is_empty() {
            driver.create_with_band_type::<u8, _>(path, metadata.width, metadata.height, 1)?
        } else {
            let mut gdal_options = CslStringList::new();
            for opt in options {
                gdal_options.add_string(&opt)?;
            }
            driver.create_with_band_type_with_options::<u8, _>(
                path,
                metadata.width,
                metadata.height,
                1,
                &gdal_options,
            )?
        };

        Self::from_dataset(dataset, metadata)
    }

    /// Georeference `dataset`, mark 255 as nodata and fill the band with it.
    pub fn from_dataset(mut dataset: Dataset, metadata: &RasterMetadata) -> Result<Self> {
        dataset.set_geo_transform(&metadata.geotransform.0)?;
        if !metadata.projection.is_empty() {
            dataset.set_projection(&metadata.projection)?;
        }

        {
            let mut band = dataset.rasterband(1)?;
            band.set_no_data_value(Some(f64::from(OUTPUT_NODATA)))?;
            band.fill(f64::from(OUTPUT_NODATA), None)?;
        }

        Ok(Self {
            dataset,
            width: metadata.width,
            height: metadata.height,
            tiles_written: 0,
        })
    }

    pub fn tiles_written(&self) -> usize {
        self.tiles_written
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Flush pending blocks and release the dataset.
    pub fn close(mut self) -> Result<()> {
        self.dataset.flush_cache()?;
        info!("Closed output raster after {} tile writes", self.tiles_written);
        Ok(())
    }
}

impl LabelSink for MosaicWriter {
    fn write_labels(&mut self, window: &Window, labels: &Array2<u8>) -> Result<()> {
        check_shape(window, labels)?;
        if window.col_end() > self.width || window.row_end() > self.height {
            return Err(SegmentationError::Configuration(format!(
                "window ({},{}) {}x{} exceeds mosaic {}x{}",
                window.col_off, window.row_off, window.width, window.height, self.width, self.height
            )));
        }

        let mut band = self.dataset.rasterband(1)?;
        let data: Vec<u8> = labels.iter().copied().collect();
        let mut buffer = Buffer::new((window.width, window.height), data);

        band.write(
            (window.col_off as isize, window.row_off as isize),
            (window.width, window.height),
            &mut buffer,
        )?;
        self.tiles_written += 1;

        debug!(
            "Wrote labels at ({},{}) size {}x{}",
            window.col_off, window.row_off, window.width, window.height
        );
        Ok(())
    }
}

/// Mosaic held in memory, initialised to [`OUTPUT_NODATA`].
#[derive(Debug, Clone)]
pub struct MemoryMosaic {
    pub labels: Array2<u8>,
    pub writes: Vec<Window>,
}

impl MemoryMosaic {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            labels: Array2::from_elem((height, width), OUTPUT_NODATA),
            writes: Vec::new(),
        }
    }
}

impl LabelSink for MemoryMosaic {
    fn write_labels(&mut self, window: &Window, labels: &Array2<u8>) -> Result<()> {
        check_shape(window, labels)?;
        let (height, width) = self.labels.dim();
        if window.col_end() > width || window.row_end() > height {
            return Err(SegmentationError::Configuration(format!(
                "window ({},{}) exceeds mosaic {}x{}",
                window.col_off, window.row_off, width, height
            )));
        }
        self.labels
            .slice_mut(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
            .assign(labels);
        self.writes.push(*window);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SampleType;
    use crate::tiling::GeoTransform;

    fn metadata(width: usize, height: usize) -> RasterMetadata {
        RasterMetadata {
            width,
            height,
            band_count: 1,
            sample_type: SampleType::UInt8,
            geotransform: GeoTransform([100.0, 0.5, 0.0, 200.0, 0.0, -0.5]),
            projection: String::new(),
            epsg: None,
            nodata: None,
        }
    }

    #[test]
    fn test_memory_mosaic_writes_window() {
        let mut mosaic = MemoryMosaic::new(8, 6);
        let labels = Array2::from_elem((2, 3), 7u8);
        mosaic.write_labels(&Window::new(4, 1, 3, 2), &labels).unwrap();

        assert_eq!(mosaic.labels[[1, 4]], 7);
        assert_eq!(mosaic.labels[[2, 6]], 7);
        assert_eq!(mosaic.labels[[0, 4]], OUTPUT_NODATA);
        assert_eq!(mosaic.labels.iter().filter(|&&v| v == 7).count(), 6);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut mosaic = MemoryMosaic::new(8, 8);
        let labels = Array2::from_elem((2, 2), 1u8);
        assert!(mosaic.write_labels(&Window::new(0, 0, 3, 2), &labels).is_err());
        assert!(mosaic.write_labels(&Window::new(7, 7, 2, 2), &labels).is_err());
    }

    #[test]
    fn test_gdal_writer_round_trip() {
        let driver = DriverManager::get_driver_by_name("MEM").unwrap();
        let dataset = driver.create_with_band_type::<u8, _>("", 16, 16, 1).unwrap();
        let mut writer = MosaicWriter::from_dataset(dataset, &metadata(16, 16)).unwrap();

        let labels = Array2::from_shape_fn((4, 4), |(r, c)| (r + c) as u8);
        writer.write_labels(&Window::new(8, 4, 4, 4), &labels).unwrap();
        assert_eq!(writer.tiles_written(), 1);

        let band = writer.dataset().rasterband(1).unwrap();
        assert_eq!(band.no_data_value(), Some(255.0));
        let buffer = band.read_as::<u8>((0, 0), (16, 16), (16, 16), None).unwrap();
        let data: Vec<u8> = buffer.into_iter().collect();
        assert_eq!(data[4 * 16 + 8], 0);
        assert_eq!(data[7 * 16 + 11], 6);
        assert_eq!(data[0], OUTPUT_NODATA);
        assert_eq!(data.iter().filter(|&&v| v != OUTPUT_NODATA).count(), 16);

        writer.close().unwrap();
    }

    #[test]
    fn test_creation_options() {
        let opts = creation_options("DEFLATE", 512).unwrap();
        assert!(opts.contains(&"COMPRESS=DEFLATE".to_string()));
        assert!(opts.contains(&"TILED=YES".to_string()));
        assert!(creation_options("jpeg", 512).is_err());
        assert!(creation_options("LZW", 100).is_err());
    }
}
