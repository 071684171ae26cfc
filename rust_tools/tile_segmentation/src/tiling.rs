use log::debug;

/// Pixel-space window `{col_off, row_off, width, height}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn col_end(&self) -> usize {
        self.col_off.saturating_add(self.width)
    }

    pub fn row_end(&self) -> usize {
        self.row_off.saturating_add(self.height)
    }

    /// Clip to `bounds`. An empty intersection yields a zero-sized window at `self`'s origin.
    pub fn intersection(&self, bounds: &Window) -> Window {
        let col_off = self.col_off.max(bounds.col_off);
        let row_off = self.row_off.max(bounds.row_off);
        let col_end = self.col_end().min(bounds.col_end());
        let row_end = self.row_end().min(bounds.row_end());

        Window {
            col_off,
            row_off,
            width: col_end.saturating_sub(col_off),
            height: row_end.saturating_sub(row_off),
        }
    }

    pub fn is_square_of(&self, size: usize) -> bool {
        self.width == size && self.height == size
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.col_off < other.col_end()
            && other.col_off < self.col_end()
            && self.row_off < other.row_end()
            && other.row_off < self.row_end()
    }
}

/// GDAL-ordered affine geotransform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Transform of a sub-window whose origin sits at the given pixel offset.
    pub fn translated(&self, col_off: usize, row_off: usize) -> GeoTransform {
        let [x0, px_w, rot_x, y0, rot_y, px_h] = self.0;
        let col = col_off as f64;
        let row = row_off as f64;
        GeoTransform([
            x0 + col * px_w + row * rot_x,
            px_w,
            rot_x,
            y0 + col * rot_y + row * px_h,
            rot_y,
            px_h,
        ])
    }

    pub fn for_window(&self, window: &Window) -> GeoTransform {
        self.translated(window.col_off, window.row_off)
    }

    /// Absolute pixel size `(x, y)`.
    pub fn resolution(&self) -> (f64, f64) {
        (self.0[1].abs(), self.0[5].abs())
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, -1.0])
    }
}

/// Lazy, single-pass enumeration of overlapping tile windows.
///
/// Offsets advance column-major: every row offset of a column is produced before the
/// next column starts. Row offsets stop `row_margin` pixels short of the raster height.
/// Windows are clipped to the raster, so edge windows may be smaller than `tile_size`
/// and consumers must reject them.
pub struct TileIndexer {
    bounds: Window,
    transform: GeoTransform,
    tile_size: usize,
    stride: usize,
    row_limit: usize,
    next_col: usize,
    next_row: usize,
}

impl TileIndexer {
    pub fn new(
        raster_width: usize,
        raster_height: usize,
        transform: GeoTransform,
        tile_size: usize,
        stride: usize,
        row_margin: usize,
    ) -> Self {
        // A zero stride would never advance.
        let stride = stride.max(1);
        let row_limit = raster_height.saturating_sub(row_margin);

        debug!(
            "TileIndexer: {}x{} raster, tile_size={}, stride={}, row offsets < {}",
            raster_width, raster_height, tile_size, stride, row_limit
        );

        Self {
            bounds: Window::new(0, 0, raster_width, raster_height),
            transform,
            tile_size,
            stride,
            row_limit,
            next_col: 0,
            next_row: 0,
        }
    }

    /// Number of column offsets the indexer visits.
    pub fn num_cols(&self) -> usize {
        self.bounds.width.div_ceil(self.stride)
    }

    /// Number of row offsets visited per column.
    pub fn num_rows(&self) -> usize {
        self.row_limit.div_ceil(self.stride)
    }

    pub fn total_windows(&self) -> usize {
        self.num_cols().saturating_mul(self.num_rows())
    }
}

impl Iterator for TileIndexer {
    type Item = (Window, GeoTransform);

    fn next(&mut self) -> Option<Self::Item> {
        if self.row_limit == 0 || self.next_col >= self.bounds.width {
            return None;
        }

        let window = Window::new(self.next_col, self.next_row, self.tile_size, self.tile_size)
            .intersection(&self.bounds);
        let transform = self.transform.for_window(&window);

        self.next_row = self.next_row.saturating_add(self.stride);
        if self.next_row >= self.row_limit {
            self.next_row = 0;
            self.next_col = self.next_col.saturating_add(self.stride);
        }

        Some((window, transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer(w: usize, h: usize, tile: usize, stride: usize, margin: usize) -> TileIndexer {
        TileIndexer::new(w, h, GeoTransform::default(), tile, stride, margin)
    }

    #[test]
    fn test_windows_stay_inside_raster() {
        let (w, h) = (1000, 700);
        for (window, _) in indexer(w, h, 256, 128, 128) {
            assert!(window.col_end() <= w);
            assert!(window.row_end() <= h);
        }
    }

    #[test]
    fn test_column_major_order() {
        let windows: Vec<_> = indexer(512, 512, 256, 256, 0).map(|(w, _)| w).collect();
        let offsets: Vec<_> = windows.iter().map(|w| (w.col_off, w.row_off)).collect();
        assert_eq!(offsets, vec![(0, 0), (0, 256), (256, 0), (256, 256)]);
        assert!(windows.iter().all(|w| w.is_square_of(256)));
    }

    #[test]
    fn test_reference_margin_for_overlapping_tiles() {
        // 256/128 with a 128 margin: rows 0, 128, 256 on a 512-high raster
        let idx = indexer(512, 512, 256, 128, 128);
        assert_eq!(idx.num_rows(), 3);
        assert_eq!(idx.num_cols(), 4);
        let windows: Vec<_> = idx.map(|(w, _)| w).collect();
        assert_eq!(windows.len(), 12);

        // Last column is clipped to 128 wide.
        let clipped = windows.iter().filter(|w| !w.is_square_of(256)).count();
        assert_eq!(clipped, 3);
    }

    #[test]
    fn test_edge_windows_are_clipped() {
        let windows: Vec<_> = indexer(300, 300, 256, 256, 0).map(|(w, _)| w).collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[1], Window::new(0, 256, 256, 44));
        assert_eq!(windows[3], Window::new(256, 256, 44, 44));
    }

    #[test]
    fn test_margin_taller_than_raster_yields_nothing() {
        assert_eq!(indexer(512, 100, 256, 128, 128).count(), 0);
    }

    #[test]
    fn test_huge_stride_and_tile_do_not_overflow() {
        let idx = indexer(512, 512, 256, usize::MAX, 0);
        assert_eq!(idx.total_windows(), 1);
        let windows: Vec<_> = idx.map(|(w, _)| w).collect();
        assert_eq!(windows, vec![Window::new(0, 0, 256, 256)]);

        let windows: Vec<_> = indexer(512, 512, usize::MAX, 300, 0).map(|(w, _)| w).collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[3], Window::new(300, 300, 212, 212));
    }

    #[test]
    fn test_transform_is_translated_by_offset() {
        let base = GeoTransform([1000.0, 0.5, 0.0, 2000.0, 0.0, -0.5]);
        let t = base.translated(256, 128);
        assert_eq!(t.0, [1128.0, 0.5, 0.0, 1936.0, 0.0, -0.5]);
        assert_eq!(t.resolution(), (0.5, 0.5));
    }

    #[test]
    fn test_intersection_and_overlap() {
        let bounds = Window::new(0, 0, 100, 100);
        let w = Window::new(80, 90, 50, 50).intersection(&bounds);
        assert_eq!(w, Window::new(80, 90, 20, 10));

        let a = Window::new(64, 64, 128, 128);
        let b = Window::new(192, 64, 128, 128);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Window::new(100, 100, 10, 10)));
    }
}
