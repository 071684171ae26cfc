use crate::config::ModelSelection;
use crate::error::{Result, SegmentationError};
use crate::model::{ModelSpec, OnnxModel, SegmentationModel};
use crate::tiling::Window;
use half::f16;
use log::{debug, info};
use ndarray::{s, stack, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;

/// Bands fed to the models.
pub const TILE_BANDS: usize = 4;

/// Labels are written as u8 and 255 is the output nodata value.
pub const MAX_CLASSES: usize = 255;

/// One tile read from the source: `image` is (bands, rows, cols).
#[derive(Debug, Clone)]
pub struct Tile {
    pub window: Window,
    pub image: Array3<f32>,
}

/// Per-tile, per-band rescale so the band maximum maps to 255.
///
/// Scaled values pass through half precision and are then truncated to whole numbers,
/// matching a reference that stored the rescaled bands back into an integer tile buffer.
/// Output is (rows, cols, bands). A band whose maximum is zero is a [`SegmentationError::DegenerateTile`].
pub fn prepare_tile(image: ArrayView3<'_, f32>, window: &Window) -> Result<Array3<f32>> {
    let (bands, rows, cols) = image.dim();
    if bands != TILE_BANDS {
        return Err(SegmentationError::Configuration(format!(
            "tile has {} bands, models expect {}",
            bands, TILE_BANDS
        )));
    }

    let mut prepared = Array3::<f32>::zeros((rows, cols, bands));
    for (band, channel) in image.outer_iter().enumerate() {
        let max = channel.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        if !(max > 0.0) {
            return Err(SegmentationError::DegenerateTile {
                col_off: window.col_off,
                row_off: window.row_off,
                band,
            });
        }

        let max = f64::from(max);
        let mut out = prepared.slice_mut(s![.., .., band]);
        out.zip_mut_with(&channel, |dst, &v| {
            *dst = f16::from_f64(f64::from(v) * 255.0 / max).to_f32().trunc();
        });
    }

    Ok(prepared)
}

/// Preprocess a batch in parallel into one `(batch, rows, cols, bands)` array.
pub fn prepare_batch(tiles: &[Tile]) -> Result<Array4<f32>> {
    let prepared: Vec<Array3<f32>> = tiles
        .par_iter()
        .map(|tile| prepare_tile(tile.image.view(), &tile.window))
        .collect::<Result<_>>()?;

    let views: Vec<_> = prepared.iter().map(|a| a.view()).collect();
    Ok(stack(Axis(0), &views[..])?)
}

/// Per-pixel argmax over the class axis; ties go to the lowest class index.
pub fn argmax_grid(probabilities: ArrayView3<'_, f32>) -> Array2<u8> {
    let (rows, cols, _) = probabilities.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut best = 0usize;
        let mut best_p = f32::NEG_INFINITY;
        for (class, &p) in probabilities.slice(s![r, c, ..]).iter().enumerate() {
            if p > best_p {
                best = class;
                best_p = p;
            }
        }
        best as u8
    })
}

/// Reduce averaged maps `(batch, rows, cols, classes)` to one label grid per tile.
pub fn argmax_labels(probabilities: ArrayView4<'_, f32>) -> Vec<Array2<u8>> {
    (0..probabilities.len_of(Axis(0)))
        .into_par_iter()
        .map(|i| argmax_grid(probabilities.index_axis(Axis(0), i)))
        .collect()
}

/// Equal-weight ensemble of independently loaded models.
pub struct EnsemblePredictor {
    models: Vec<Box<dyn SegmentationModel>>,
}

impl EnsemblePredictor {
    pub fn new(models: Vec<Box<dyn SegmentationModel>>) -> Result<Self> {
        if models.is_empty() {
            return Err(SegmentationError::Configuration(
                "ensemble needs at least one model".to_string(),
            ));
        }
        Ok(Self { models })
    }

    /// Build lazily loaded ONNX models for the selected specs.
    pub fn from_specs(specs: &[ModelSpec], selection: &ModelSelection) -> Result<Self> {
        let selected = selection.select(specs)?;
        let models = selected
            .into_iter()
            .map(|spec| Box::new(OnnxModel::new(spec)) as Box<dyn SegmentationModel>)
            .collect();
        Self::new(models)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name()).collect()
    }

    /// Load every member up front instead of on the first batch.
    pub fn load_all(&mut self) -> Result<()> {
        for model in &mut self.models {
            model.load()?;
        }
        info!("Loaded {} model(s): {:?}", self.models.len(), self.model_names());
        Ok(())
    }

    /// Elementwise mean of every member's probability maps for a prepared batch.
    pub fn average_probabilities(&mut self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (batch, rows, cols, _) = input.dim();
        let mut sum: Option<Array4<f64>> = None;

        for model in &mut self.models {
            let probs = model.predict_batch(input)?;
            let (b, r, c, classes) = probs.dim();
            if (b, r, c) != (batch, rows, cols) || classes == 0 || classes > MAX_CLASSES {
                return Err(SegmentationError::Inference(format!(
                    "model '{}' returned shape {:?} for input {:?}",
                    model.name(),
                    probs.shape(),
                    input.shape()
                )));
            }

            match sum.as_mut() {
                None => sum = Some(probs.mapv(f64::from)),
                Some(acc) => {
                    if acc.dim() != probs.dim() {
                        return Err(SegmentationError::Inference(format!(
                            "model '{}' disagrees on class count: {} vs {}",
                            model.name(),
                            classes,
                            acc.len_of(Axis(3))
                        )));
                    }
                    acc.zip_mut_with(&probs, |a, &p| *a += f64::from(p));
                }
            }
        }

        let n = self.models.len() as f64;
        let sum = sum.ok_or_else(|| SegmentationError::Configuration("empty ensemble".to_string()))?;
        Ok(sum.mapv(|v| (v / n) as f32))
    }

    /// Preprocess, infer, average and argmax one batch. One label grid per tile, in order.
    pub fn predict(&mut self, tiles: &[Tile]) -> Result<Vec<Array2<u8>>> {
        if tiles.is_empty() {
            return Ok(Vec::new());
        }
        let input = prepare_batch(tiles)?;
        debug!("Running {} model(s) on batch {:?}", self.models.len(), input.shape());
        let averaged = self.average_probabilities(input.view())?;
        Ok(argmax_labels(averaged.view()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::{arr1, Array1};

    /// Scores every pixel of every tile with the same class probabilities.
    pub(crate) struct FixedModel {
        pub name: String,
        pub probabilities: Array1<f32>,
        pub loads: usize,
        pub calls: usize,
    }

    impl FixedModel {
        pub(crate) fn new(name: &str, probabilities: &[f32]) -> Self {
            Self {
                name: name.to_string(),
                probabilities: arr1(probabilities),
                loads: 0,
                calls: 0,
            }
        }
    }

    impl SegmentationModel for FixedModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn load(&mut self) -> Result<()> {
            if self.loads == 0 {
                self.loads = 1;
            }
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            self.loads > 0
        }

        fn predict_batch(&mut self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
            self.load()?;
            self.calls += 1;
            let (b, r, c, _) = batch.dim();
            let k = self.probabilities.len();
            Ok(Array4::from_shape_fn((b, r, c, k), |(_, _, _, class)| {
                self.probabilities[class]
            }))
        }
    }

    fn tile(value: f32) -> Tile {
        Tile {
            window: Window::new(0, 0, 4, 4),
            image: Array3::from_elem((TILE_BANDS, 4, 4), value),
        }
    }

    #[test]
    fn test_prepare_tile_scales_each_band_to_255() {
        let mut image = Array3::<f32>::zeros((4, 2, 2));
        for band in 0..4 {
            image[[band, 0, 0]] = 10.0 * (band + 1) as f32;
            image[[band, 1, 1]] = 5.0 * (band + 1) as f32;
        }
        let out = prepare_tile(image.view(), &Window::new(0, 0, 2, 2)).unwrap();
        assert_eq!(out.dim(), (2, 2, 4));
        for band in 0..4 {
            assert_eq!(out[[0, 0, band]], 255.0);
            // 127.5 is exact in f16, then truncated
            assert_eq!(out[[1, 1, band]], 127.0);
            assert_eq!(out[[0, 1, band]], 0.0);
        }
    }

    #[test]
    fn test_prepare_tile_reduced_precision() {
        // 999/1000 * 255 = 254.745, which rounds to 254.75 in f16 and truncates to 254;
        // 65534/65535 * 255 = 254.996, which rounds up to 255.0 in f16.
        let mut image = Array3::<f32>::from_elem((4, 1, 3), 1000.0);
        image[[0, 0, 1]] = 999.0;
        image[[1, 0, 0]] = 65535.0;
        image[[1, 0, 1]] = 65534.0;
        let out = prepare_tile(image.view(), &Window::new(0, 0, 3, 1)).unwrap();
        assert_eq!(out[[0, 1, 0]], 254.0);
        assert_eq!(out[[0, 1, 1]], 255.0);
    }

    #[test]
    fn test_zero_max_band_is_degenerate() {
        let mut image = Array3::<f32>::from_elem((4, 2, 2), 7.0);
        image.slice_mut(s![2, .., ..]).fill(0.0);
        let err = prepare_tile(image.view(), &Window::new(256, 512, 2, 2)).unwrap_err();
        assert!(matches!(
            err,
            SegmentationError::DegenerateTile { col_off: 256, row_off: 512, band: 2 }
        ));
    }

    #[test]
    fn test_argmax_ties_pick_lowest_class() {
        let mut probs = Array3::<f32>::zeros((1, 2, 3));
        probs[[0, 0, 1]] = 0.5;
        probs[[0, 0, 2]] = 0.5;
        probs[[0, 1, 2]] = 0.9;
        let labels = argmax_grid(probs.view());
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[0, 1]], 2);
    }

    #[test]
    fn test_single_model_equals_duplicated_ensemble() {
        let p = [0.1f32, 0.3, 0.6];
        let input = prepare_batch(&[tile(3.0), tile(9.0)]).unwrap();

        let mut single = EnsemblePredictor::new(vec![Box::new(FixedModel::new("a", &p))]).unwrap();
        let mut triple = EnsemblePredictor::new(vec![
            Box::new(FixedModel::new("a", &p)),
            Box::new(FixedModel::new("b", &p)),
            Box::new(FixedModel::new("c", &p)),
        ])
        .unwrap();

        let one = single.average_probabilities(input.view()).unwrap();
        let three = triple.average_probabilities(input.view()).unwrap();
        assert_eq!(one, three);
    }

    #[test]
    fn test_ensemble_mean_changes_decision() {
        // Model a prefers class 0 weakly, model b prefers class 1 strongly.
        let mut ensemble = EnsemblePredictor::new(vec![
            Box::new(FixedModel::new("a", &[0.6, 0.4])),
            Box::new(FixedModel::new("b", &[0.1, 0.9])),
        ])
        .unwrap();
        let labels = ensemble.predict(&[tile(1.0)]).unwrap();
        assert_eq!(labels.len(), 1);
        assert!(labels[0].iter().all(|&l| l == 1));
    }

    #[test]
    fn test_mismatched_class_counts_are_rejected() {
        let mut ensemble = EnsemblePredictor::new(vec![
            Box::new(FixedModel::new("a", &[0.5, 0.5])),
            Box::new(FixedModel::new("b", &[0.2, 0.3, 0.5])),
        ])
        .unwrap();
        assert!(matches!(
            ensemble.predict(&[tile(1.0)]),
            Err(SegmentationError::Inference(_))
        ));
    }

    #[test]
    fn test_empty_ensemble_is_a_configuration_error() {
        assert!(EnsemblePredictor::new(Vec::new()).is_err());
        assert!(matches!(
            EnsemblePredictor::from_specs(&[], &ModelSelection::All),
            Err(SegmentationError::Configuration(_))
        ));
        let specs = vec![ModelSpec {
            name: "a".to_string(),
            path: "/models/a.onnx".into(),
        }];
        assert!(matches!(
            EnsemblePredictor::from_specs(&specs, &ModelSelection::Only("b".to_string())),
            Err(SegmentationError::Configuration(_))
        ));
        let ensemble = EnsemblePredictor::from_specs(&specs, &ModelSelection::All).unwrap();
        assert_eq!(ensemble.model_names(), vec!["a"]);
    }

    #[test]
    fn test_load_all_is_idempotent() {
        let mut ensemble =
            EnsemblePredictor::new(vec![Box::new(FixedModel::new("a", &[1.0]))]).unwrap();
        ensemble.load_all().unwrap();
        ensemble.load_all().unwrap();
        assert_eq!(ensemble.model_names(), vec!["a"]);
    }
}
