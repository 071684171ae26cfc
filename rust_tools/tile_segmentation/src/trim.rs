use crate::error::{Result, SegmentationError};
use crate::tiling::Window;
use ndarray::{s, Array2};

/// Keeps the interior of each predicted tile, discarding a `crop_amount` border.
#[derive(Debug, Clone, Copy)]
pub struct OverlapTrimmer {
    tile_size: usize,
    crop_amount: usize,
}

impl OverlapTrimmer {
    /// Fails when the interior would be empty, so this is checked before any inference.
    pub fn new(tile_size: usize, crop_amount: usize) -> Result<Self> {
        // 2 * crop_amount >= tile_size, without the multiplication
        if crop_amount >= tile_size / 2 + tile_size % 2 {
            return Err(SegmentationError::Configuration(format!(
                "crop amount {} leaves no interior in a {}px tile",
                crop_amount, tile_size
            )));
        }
        Ok(Self {
            tile_size,
            crop_amount,
        })
    }

    /// Side length of the kept interior.
    pub fn interior(&self) -> usize {
        self.tile_size - 2 * self.crop_amount
    }

    pub fn crop_window(&self, window: &Window) -> Result<Window> {
        if !window.is_square_of(self.tile_size) {
            return Err(SegmentationError::Configuration(format!(
                "cannot crop a {}x{} window with tile size {}",
                window.width, window.height, self.tile_size
            )));
        }
        let side = self.interior();
        Ok(Window::new(
            window.col_off + self.crop_amount,
            window.row_off + self.crop_amount,
            side,
            side,
        ))
    }

    /// Returns the interior labels and the output-space window they belong to.
    pub fn trim(&self, labels: &Array2<u8>, window: &Window) -> Result<(Array2<u8>, Window)> {
        let crop_window = self.crop_window(window)?;
        let (rows, cols) = labels.dim();
        if rows != self.tile_size || cols != self.tile_size {
            return Err(SegmentationError::Configuration(format!(
                "label grid is {}x{}, expected {}x{}",
                rows, cols, self.tile_size, self.tile_size
            )));
        }

        let start = self.crop_amount;
        let end = self.tile_size - self.crop_amount;
        let interior = labels.slice(s![start..end, start..end]).to_owned();

        Ok((interior, crop_window))
    }
}
