use ndarray::{ArrayView2, ArrayView3, Axis};
use serde::Deserialize;

/// How a tile is judged to carry no usable signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodataPolicy {
    /// Every pixel of the reference band equals the sentinel.
    #[default]
    AllEqual,
    /// The mean over all bands equals the sentinel. Mixed tiles can be dropped by this test.
    Average,
}

/// Band checked by [`NodataPolicy::AllEqual`].
pub const REFERENCE_BAND: usize = 0;

/// A NaN sentinel matches NaN pixels.
fn matches_nodata(value: f64, nodata: f64) -> bool {
    if nodata.is_nan() {
        value.is_nan()
    } else {
        value == nodata
    }
}

/// True when every pixel of a single band equals the sentinel.
pub fn is_empty_band(band: ArrayView2<'_, f32>, nodata: Option<f64>) -> bool {
    let Some(nodata) = nodata else {
        return false;
    };
    band.iter().all(|&v| matches_nodata(f64::from(v), nodata))
}

/// Returns true when `tile` (bands, rows, cols) should be skipped.
///
/// Without a sentinel nothing is ever skipped.
pub fn is_empty_tile(tile: ArrayView3<'_, f32>, nodata: Option<f64>, policy: NodataPolicy) -> bool {
    let Some(sentinel) = nodata else {
        return false;
    };
    if tile.is_empty() {
        return true;
    }

    match policy {
        NodataPolicy::AllEqual => is_empty_band(tile.index_axis(Axis(0), REFERENCE_BAND), nodata),
        NodataPolicy::Average => {
            let sum: f64 = tile.iter().map(|&v| f64::from(v)).sum();
            matches_nodata(sum / tile.len() as f64, sentinel)
        }
    }
}
