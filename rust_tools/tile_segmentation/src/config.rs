use crate::error::{Result, SegmentationError};
use crate::model::ModelSpec;
use crate::nodata::NodataPolicy;
use crate::trim::OverlapTrimmer;
use crate::warp::WarpProfile;
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 16;

/// Which configured models take part in the ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    #[default]
    All,
    Only(String),
}

impl ModelSelection {
    pub fn select(&self, specs: &[ModelSpec]) -> Result<Vec<ModelSpec>> {
        let selected: Vec<ModelSpec> = match self {
            ModelSelection::All => specs.to_vec(),
            ModelSelection::Only(name) => specs.iter().filter(|s| &s.name == name).cloned().collect(),
        };

        if selected.is_empty() {
            return Err(match self {
                ModelSelection::All => {
                    SegmentationError::Configuration("no models configured".to_string())
                }
                ModelSelection::Only(name) => {
                    SegmentationError::Configuration(format!("unknown model '{}'", name))
                }
            });
        }
        Ok(selected)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tile_size: usize,
    pub stride: usize,
    pub batch_size: usize,
    pub crop_amount: usize,
    pub reclassify: bool,
    /// Row offsets stop this many pixels short of the raster height.
    /// Unset means `tile_size - stride`.
    pub row_margin: Option<usize>,
    pub nodata_policy: NodataPolicy,
    pub models: Vec<ModelSpec>,
    pub selection: ModelSelection,
    pub warp: Option<WarpProfile>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            stride: 128,
            batch_size: 4,
            crop_amount: 64,
            reclassify: false,
            row_margin: None,
            nodata_policy: NodataPolicy::AllEqual,
            models: Vec::new(),
            selection: ModelSelection::All,
            warp: None,
        }
    }
}

impl PipelineConfig {
    pub fn row_margin(&self) -> usize {
        self.row_margin
            .unwrap_or_else(|| self.tile_size.saturating_sub(self.stride))
    }

    pub fn trimmer(&self) -> Result<OverlapTrimmer> {
        OverlapTrimmer::new(self.tile_size, self.crop_amount)
    }

    /// Geometry and batching checks; run before any raster is opened for writing.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(SegmentationError::Configuration(
                "tile size must be positive".to_string(),
            ));
        }
        if self.stride == 0 {
            return Err(SegmentationError::Configuration(
                "stride must be positive".to_string(),
            ));
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(SegmentationError::Configuration(format!(
                "batch size {} outside {}..={}",
                self.batch_size, MIN_BATCH_SIZE, MAX_BATCH_SIZE
            )));
        }

        self.trimmer()?;
        Ok(())
    }

    /// Warn when cropped tiles will not tile the mosaic exactly.
    pub fn warn_on_uneven_coverage(&self) {
        let Ok(trimmer) = self.trimmer() else {
            return;
        };
        if self.stride != trimmer.interior() {
            warn!(
                "Stride {} differs from the cropped tile span {}; the mosaic will have {}",
                self.stride,
                trimmer.interior(),
                if self.stride > trimmer.interior() { "gaps" } else { "overwritten pixels" }
            );
        }
    }
}

/// Read a JSON config; missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    info!("Loading config: {}", path.display());
    let contents = fs::read_to_string(path).map_err(|e| {
        SegmentationError::ConfigFile(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        SegmentationError::ConfigFile(format!("failed to parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn specs() -> Vec<ModelSpec> {
        ["model_1", "model_2", "model_3"]
            .iter()
            .map(|name| ModelSpec {
                name: name.to_string(),
                path: PathBuf::from(format!("/models/{}.onnx", name)),
            })
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.row_margin(), 128);
    }

    #[test]
    fn test_row_margin_follows_geometry() {
        let config = PipelineConfig {
            stride: 256,
            ..Default::default()
        };
        assert_eq!(config.row_margin(), 0);

        let config = PipelineConfig {
            row_margin: Some(128),
            stride: 256,
            ..Default::default()
        };
        assert_eq!(config.row_margin(), 128);
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        let config = PipelineConfig {
            tile_size: 128,
            crop_amount: 64,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SegmentationError::Configuration(_))));

        let config = PipelineConfig {
            stride: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_size_range() {
        for (batch_size, ok) in [(0, false), (1, true), (16, true), (17, false)] {
            let config = PipelineConfig {
                batch_size,
                ..Default::default()
            };
            assert_eq!(config.validate().is_ok(), ok, "batch_size={}", batch_size);
        }
    }

    #[test]
    fn test_select_all_and_named() {
        assert_eq!(ModelSelection::All.select(&specs()).unwrap().len(), 3);

        let only = ModelSelection::Only("model_2".to_string()).select(&specs()).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "model_2");

        assert!(ModelSelection::Only("missing".to_string()).select(&specs()).is_err());
        assert!(ModelSelection::All.select(&[]).is_err());
    }

    #[test]
    fn test_parse_json_with_defaults() {
        let json = r#"{
            "stride": 256,
            "reclassify": true,
            "nodata_policy": "average",
            "models": [{"name": "a", "path": "/m/a.onnx"}],
            "selection": {"only": "a"}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.stride, 256);
        assert_eq!(config.batch_size, 4);
        assert!(config.reclassify);
        assert_eq!(config.nodata_policy, NodataPolicy::Average);
        assert_eq!(config.selection, ModelSelection::Only("a".to_string()));
        assert_eq!(config.models.len(), 1);
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, SegmentationError::ConfigFile(_)));
    }
}
