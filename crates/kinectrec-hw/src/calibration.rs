//! Sensor calibration parameters.
//!
//! The driver reports one parameter block per sensor. Overrides can be
//! loaded from a TOML file with `[ir]` and `[color]` sections whose keys
//! match the field names below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Scale applied to depth-space offsets before evaluating the mapping polynomials.
pub(crate) const DEPTH_Q: f32 = 0.01;
/// Scale of the color-space result of the mapping polynomials.
pub(crate) const COLOR_Q: f32 = 0.002199;

/// IR (depth) camera intrinsics with Brown–Conrady distortion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IrParams {
    /// Focal length x (pixel)
    pub fx: f32,
    /// Focal length y (pixel)
    pub fy: f32,
    /// Principal point x (pixel)
    pub cx: f32,
    /// Principal point y (pixel)
    pub cy: f32,
    /// Radial distortion, 1st order
    pub k1: f32,
    /// Radial distortion, 2nd order
    pub k2: f32,
    /// Radial distortion, 3rd order
    pub k3: f32,
    /// Tangential distortion
    pub p1: f32,
    /// Tangential distortion
    pub p2: f32,
}

impl IrParams {
    /// Plausible intrinsics for a 512x424 time-of-flight sensor.
    pub fn nominal() -> Self {
        Self {
            fx: 365.456,
            fy: 365.456,
            cx: 254.878,
            cy: 205.395,
            k1: 0.0905474,
            k2: -0.26819,
            k3: 0.0950862,
            p1: 0.0,
            p2: 0.0,
        }
    }
}

/// Color camera intrinsics plus the depth→color mapping.
///
/// The `mx_*`/`my_*` terms are coefficients of two cubic polynomials in the
/// scaled depth-space offsets (x, y). `shift_d`/`shift_m` encode the
/// baseline parallax, applied per pixel as `shift_m / z`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorParams {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,

    pub shift_d: f32,
    pub shift_m: f32,

    pub mx_x3y0: f32,
    pub mx_x0y3: f32,
    pub mx_x2y1: f32,
    pub mx_x1y2: f32,
    pub mx_x2y0: f32,
    pub mx_x0y2: f32,
    pub mx_x1y1: f32,
    pub mx_x1y0: f32,
    pub mx_x0y1: f32,
    pub mx_x0y0: f32,

    pub my_x3y0: f32,
    pub my_x0y3: f32,
    pub my_x2y1: f32,
    pub my_x1y2: f32,
    pub my_x2y0: f32,
    pub my_x0y2: f32,
    pub my_x1y1: f32,
    pub my_x1y0: f32,
    pub my_x0y1: f32,
    pub my_x0y0: f32,
}

impl ColorParams {
    /// Build a purely linear mapping: a depth ray at normalized coordinate
    /// `(u, v)` lands on the color ray `(u + shift_m / z, v)`.
    pub fn pinhole(
        ir: &IrParams,
        fx: f32,
        fy: f32,
        cx: f32,
        cy: f32,
        shift_d: f32,
        shift_m: f32,
    ) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            shift_d,
            shift_m,
            mx_x1y0: fx * COLOR_Q / (ir.fx * DEPTH_Q),
            mx_x0y0: shift_m / shift_d * fx * COLOR_Q,
            my_x0y1: fy * COLOR_Q / (ir.fy * DEPTH_Q),
            ..Self::default()
        }
    }

    /// Linear mapping for a 1920x1080 color sensor paired with [`IrParams::nominal`].
    pub fn nominal() -> Self {
        Self::pinhole(&IrParams::nominal(), 1081.37, 1081.37, 959.5, 539.5, 863.0, 52.0)
    }
}

/// Both parameter blocks, as reported by a device or read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    pub ir: IrParams,
    pub color: ColorParams,
}

impl Calibration {
    pub fn nominal() -> Self {
        Self {
            ir: IrParams::nominal(),
            color: ColorParams::nominal(),
        }
    }

    pub fn from_toml_str(src: &str) -> Result<Self, CalibrationError> {
        Ok(toml::from_str(src)?)
    }

    /// Read a calibration override file.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let src = std::fs::read_to_string(path).map_err(|source| CalibrationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let calibration = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), "loaded calibration override");
        Ok(calibration)
    }
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read calibration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("bad calibration TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_calibration_toml() {
        let src = r#"
            [ir]
            fx = 365.0
            fy = 365.0
            cx = 256.0
            cy = 212.0
            k1 = 0.0
            k2 = 0.0
            k3 = 0.0
            p1 = 0.0
            p2 = 0.0

            [color]
            fx = 1081.0
            fy = 1081.0
            cx = 959.5
            cy = 539.5
            shift_d = 863.0
            shift_m = 52.0
            mx_x3y0 = 0.0
            mx_x0y3 = 0.0
            mx_x2y1 = 0.0
            mx_x1y2 = 0.0
            mx_x2y0 = 0.0
            mx_x0y2 = 0.0
            mx_x1y1 = 0.0
            mx_x1y0 = 0.65
            mx_x0y1 = 0.0
            mx_x0y0 = 0.14
            my_x3y0 = 0.0
            my_x0y3 = 0.0
            my_x2y1 = 0.0
            my_x1y2 = 0.0
            my_x2y0 = 0.0
            my_x0y2 = 0.0
            my_x1y1 = 0.0
            my_x1y0 = 0.0
            my_x0y1 = 0.65
            my_x0y0 = 0.0
        "#;
        let calibration = Calibration::from_toml_str(src).unwrap();
        assert_eq!(calibration.ir.cx, 256.0);
        assert_eq!(calibration.color.shift_m, 52.0);
        assert_eq!(calibration.color.my_x0y1, 0.65);
    }

    #[test]
    fn test_missing_section_is_an_error() {
        let result = Calibration::from_toml_str("[ir]\nfx = 1.0\n");
        assert!(matches!(result, Err(CalibrationError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = Calibration::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(CalibrationError::Read { .. })));
    }

    #[test]
    fn test_pinhole_cancels_constant_shift() {
        let ir = IrParams::nominal();
        let color = ColorParams::nominal();
        // At the depth principal point the polynomial reduces to mx_x0y0,
        // which must cancel the -shift_m/shift_d term.
        let map_x = color.mx_x0y0 / (color.fx * COLOR_Q) - color.shift_m / color.shift_d;
        assert!(map_x.abs() < 1e-6);
        assert!(color.mx_x1y0 > 0.0 && ir.fx > 0.0);
    }
}
