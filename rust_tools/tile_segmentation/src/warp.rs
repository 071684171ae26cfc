use crate::error::{Result, SegmentationError};
use clap::ValueEnum;
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    Average,
}

impl Resampling {
    pub fn as_gdal(&self) -> &'static str {
        match self {
            Resampling::Nearest => "near",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::Average => "average",
        }
    }
}

/// Target grid for reading the source through a reprojected view.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct WarpProfile {
    /// Anything `gdalwarp -t_srs` accepts, e.g. `EPSG:2230`.
    pub target_crs: Option<String>,
    /// Square output pixel size in target CRS units.
    pub resolution: Option<f64>,
    pub resampling: Resampling,
}

impl WarpProfile {
    pub fn is_identity(&self) -> bool {
        self.target_crs.is_none() && self.resolution.is_none()
    }
}

/// Arguments for `gdalwarp` producing a VRT view of `input`.
pub fn warp_args(input: &Path, output: &Path, profile: &WarpProfile) -> Result<Vec<String>> {
    let mut args = vec!["-of".to_string(), "VRT".to_string(), "-overwrite".to_string()];

    if let Some(crs) = &profile.target_crs {
        args.push("-t_srs".to_string());
        args.push(crs.clone());
    }
    if let Some(res) = profile.resolution {
        if !(res > 0.0) {
            return Err(SegmentationError::Configuration(format!(
                "warp resolution must be positive, got {}",
                res
            )));
        }
        args.push("-tr".to_string());
        args.push(res.to_string());
        args.push(res.to_string());
    }
    args.push("-r".to_string());
    args.push(profile.resampling.as_gdal().to_string());
    args.push(input.to_string_lossy().into_owned());
    args.push(output.to_string_lossy().into_owned());

    Ok(args)
}

/// Path of the VRT written next to `output`.
pub fn vrt_path_for(output: &Path) -> PathBuf {
    output.with_extension("warped.vrt")
}

/// Build a warped VRT with the external `gdalwarp` tool.
pub fn build_warped_vrt(input: &Path, vrt_path: &Path, profile: &WarpProfile) -> Result<()> {
    info!("Building warped view {} using gdalwarp...", vrt_path.display());
    let args = warp_args(input, vrt_path, profile)?;
    debug!("gdalwarp {}", args.join(" "));

    let output = Command::new("gdalwarp").args(&args).output().map_err(|e| {
        SegmentationError::WarpFailed(format!("could not run gdalwarp: {}", e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SegmentationError::WarpFailed(format!(
            "gdalwarp failed: {}",
            stderr
        )));
    }

    info!("Warped view ready");
    Ok(())
}
