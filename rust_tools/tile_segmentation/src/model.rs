use crate::error::{Result, SegmentationError};
use log::{debug, info};
use ndarray::{Array4, ArrayView4, Ix4};
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

/// Where to find one ensemble member.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub path: PathBuf,
}

impl FromStr for ModelSpec {
    type Err = String;

    /// Parses `name=path`, or a bare path whose file stem becomes the name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, path) = match s.split_once('=') {
            Some((name, path)) => (name.trim().to_string(), PathBuf::from(path.trim())),
            None => {
                let path = PathBuf::from(s.trim());
                let name = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (name, path)
            }
        };
        if name.is_empty() || path.as_os_str().is_empty() {
            return Err(format!("invalid model '{}', expected NAME=PATH", s));
        }
        Ok(ModelSpec { name, path })
    }
}

/// A pretrained per-pixel classifier.
///
/// `predict_batch` takes preprocessed input shaped `(batch, rows, cols, bands)` and returns
/// class probabilities shaped `(batch, rows, cols, classes)`. Implementations load lazily:
/// `load` may be called any number of times and `predict_batch` loads on first use.
pub trait SegmentationModel: Send {
    fn name(&self) -> &str;

    fn load(&mut self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    fn predict_batch(&mut self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>>;
}

struct LoadedSession {
    session: Session,
    input_name: String,
    output_name: String,
}

/// ONNX Runtime backed model, loaded on first use.
pub struct OnnxModel {
    spec: ModelSpec,
    loaded: Option<LoadedSession>,
}

impl OnnxModel {
    pub fn new(spec: ModelSpec) -> Self {
        Self { spec, loaded: None }
    }

    fn session(&mut self) -> Result<&mut LoadedSession> {
        self.load()?;
        self.loaded
            .as_mut()
            .ok_or_else(|| SegmentationError::Inference(format!("model '{}' not loaded", self.spec.name)))
    }
}

fn ort_error(model: &str, e: impl std::fmt::Display) -> SegmentationError {
    SegmentationError::Inference(format!("model '{}': {}", model, e))
}

impl SegmentationModel for OnnxModel {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn load(&mut self) -> Result<()> {
        if self.loaded.is_some() {
            return Ok(());
        }

        info!("Loading model '{}' from {}", self.spec.name, self.spec.path.display());
        let name = self.spec.name.clone();
        let session = Session::builder()
            .map_err(|e| ort_error(&name, e))?
            .commit_from_file(&self.spec.path)
            .map_err(|e| ort_error(&name, e))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ort_error(&name, "model has no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ort_error(&name, "model has no outputs"))?;
        debug!("Model '{}': input '{}', output '{}'", name, input_name, output_name);

        self.loaded = Some(LoadedSession {
            session,
            input_name,
            output_name,
        });
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn predict_batch(&mut self, batch: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let name = self.spec.name.clone();
        let loaded = self.session()?;

        let input_tensor = Tensor::from_array(batch.to_owned()).map_err(|e| ort_error(&name, e))?;
        let outputs = loaded
            .session
            .run(ort::inputs![loaded.input_name.as_str() => input_tensor])
            .map_err(|e| ort_error(&name, e))?;
        let output_view = outputs[loaded.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| ort_error(&name, e))?;

        Ok(output_view.to_owned().into_dimensionality::<Ix4>()?)
    }
}
