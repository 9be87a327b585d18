//! Depth/color registration on the CPU.
//!
//! Maps every depth pixel into the color image using the calibration
//! polynomials, producing an undistorted depth frame, a color frame
//! resampled into depth space and a depth map at color resolution
//! ("big depth"). Lookup tables depend only on the calibration and are
//! built once in [`Registration::with_geometry`].

use crate::calibration::{Calibration, ColorParams, IrParams, COLOR_Q, DEPTH_Q};
use crate::frame::{Frame, FrameKind, COLOR_HEIGHT, COLOR_WIDTH, DEPTH_HEIGHT, DEPTH_WIDTH};
use thiserror::Error;

/// Half-width of the occlusion filter window in color pixels.
const FILTER_WIDTH_HALF: i64 = 2;
/// Half-height of the occlusion filter window. Big depth carries this many
/// extra rows above and below the color image.
const FILTER_HEIGHT_HALF: i64 = 1;
/// Relative depth difference above which a color sample counts as occluded.
const FILTER_TOLERANCE: f32 = 0.01;

/// Resolutions of the two sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGeometry {
    pub depth_width: u32,
    pub depth_height: u32,
    pub color_width: u32,
    pub color_height: u32,
}

impl SensorGeometry {
    pub const KINECT_V2: Self = Self {
        depth_width: DEPTH_WIDTH,
        depth_height: DEPTH_HEIGHT,
        color_width: COLOR_WIDTH,
        color_height: COLOR_HEIGHT,
    };

    /// Height of the big depth map, including the filter border rows.
    pub fn big_depth_height(&self) -> u32 {
        self.color_height + 2 * FILTER_HEIGHT_HALF as u32
    }
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self::KINECT_V2
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{kind} frame is {actual_width}x{actual_height}, expected {width}x{height}")]
    GeometryMismatch {
        kind: FrameKind,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Precomputed depth→color mapping for one calibration.
pub struct Registration {
    ir: IrParams,
    color: ColorParams,
    geometry: SensorGeometry,
    /// Index of the distorted depth pixel feeding each undistorted pixel, -1 if outside.
    distort_map: Vec<i32>,
    /// Normalized color x before parallax, per depth pixel.
    map_x: Vec<f32>,
    /// Rounded color row, per depth pixel.
    map_yi: Vec<i32>,
    /// Color offset chosen for each depth pixel during the last apply, -1 if none.
    color_offsets: Vec<i64>,
}

impl Registration {
    pub fn new(calibration: &Calibration) -> Self {
        Self::with_geometry(calibration, SensorGeometry::KINECT_V2)
    }

    pub fn with_geometry(calibration: &Calibration, geometry: SensorGeometry) -> Self {
        let size = (geometry.depth_width as usize) * (geometry.depth_height as usize);
        let mut reg = Self {
            ir: calibration.ir,
            color: calibration.color,
            geometry,
            distort_map: Vec::with_capacity(size),
            map_x: Vec::with_capacity(size),
            map_yi: Vec::with_capacity(size),
            color_offsets: vec![-1; size],
        };

        let dw = geometry.depth_width as i64;
        let dh = geometry.depth_height as i64;
        for y in 0..dh {
            for x in 0..dw {
                let (mx, my) = reg.distort(x as f32, y as f32);
                let ix = (mx + 0.5) as i64;
                let iy = (my + 0.5) as i64;
                let index = if ix < 0 || ix >= dw || iy < 0 || iy >= dh {
                    -1
                } else {
                    (iy * dw + ix) as i32
                };
                reg.distort_map.push(index);

                let (rx, ry) = reg.depth_to_color(x as f32, y as f32);
                reg.map_x.push(rx);
                reg.map_yi.push((ry + 0.5) as i32);
            }
        }

        tracing::debug!(
            depth_width = geometry.depth_width,
            depth_height = geometry.depth_height,
            color_width = geometry.color_width,
            color_height = geometry.color_height,
            "registration tables built"
        );
        reg
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    /// Allocate output frames of the right size for [`apply`](Self::apply).
    pub fn allocate_outputs(&self) -> (Frame, Frame, Frame) {
        let g = self.geometry;
        (
            Frame::new(FrameKind::Depth, g.depth_width, g.depth_height),
            Frame::new(FrameKind::Registered, g.depth_width, g.depth_height),
            Frame::new(FrameKind::BigDepth, g.color_width, g.big_depth_height()),
        )
    }

    /// Apply radial and tangential distortion to an undistorted depth pixel.
    fn distort(&self, mx: f32, my: f32) -> (f32, f32) {
        let d = &self.ir;
        let dx = (mx - d.cx) / d.fx;
        let dy = (my - d.cy) / d.fy;
        let dx2 = dx * dx;
        let dy2 = dy * dy;
        let r2 = dx2 + dy2;
        let dxdy2 = 2.0 * dx * dy;
        let kr = 1.0 + ((d.k3 * r2 + d.k2) * r2 + d.k1) * r2;
        (
            d.fx * (dx * kr + d.p2 * (r2 + 2.0 * dx2) + d.p1 * dxdy2) + d.cx,
            d.fy * (dy * kr + d.p1 * (r2 + 2.0 * dy2) + d.p2 * dxdy2) + d.cy,
        )
    }

    /// Evaluate the mapping polynomials: normalized color x (without the
    /// per-pixel parallax term) and absolute color row.
    fn depth_to_color(&self, mx: f32, my: f32) -> (f32, f32) {
        let c = &self.color;
        let x = (mx - self.ir.cx) * DEPTH_Q;
        let y = (my - self.ir.cy) * DEPTH_Q;

        let wx = x * x * x * c.mx_x3y0
            + y * y * y * c.mx_x0y3
            + x * x * y * c.mx_x2y1
            + y * y * x * c.mx_x1y2
            + x * x * c.mx_x2y0
            + y * y * c.mx_x0y2
            + x * y * c.mx_x1y1
            + x * c.mx_x1y0
            + y * c.mx_x0y1
            + c.mx_x0y0;

        let wy = x * x * x * c.my_x3y0
            + y * y * y * c.my_x0y3
            + x * x * y * c.my_x2y1
            + y * y * x * c.my_x1y2
            + x * x * c.my_x2y0
            + y * y * c.my_x0y2
            + x * y * c.my_x1y1
            + x * c.my_x1y0
            + y * c.my_x0y1
            + c.my_x0y0;

        (
            wx / (c.fx * COLOR_Q) - c.shift_m / c.shift_d,
            wy / COLOR_Q + c.cy,
        )
    }

    /// Register `depth` against `color`, writing into caller-owned outputs.
    ///
    /// Big depth pixels that no depth sample reaches are left at +inf.
    pub fn apply(
        &mut self,
        color: &Frame,
        depth: &Frame,
        undistorted: &mut Frame,
        registered: &mut Frame,
        big_depth: &mut Frame,
    ) -> Result<(), RegistrationError> {
        let g = self.geometry;
        check_geometry(color, g.color_width, g.color_height)?;
        check_geometry(depth, g.depth_width, g.depth_height)?;
        check_geometry(undistorted, g.depth_width, g.depth_height)?;
        check_geometry(registered, g.depth_width, g.depth_height)?;
        check_geometry(big_depth, g.color_width, g.big_depth_height())?;

        let cw = g.color_width as i64;
        let ch = g.color_height as i64;
        let color_cx = self.color.cx + 0.5;
        let shift_m = self.color.shift_m;
        let color_fx = self.color.fx;

        let depth_data = depth.depth();
        let undistorted_data = undistorted.depth_mut();
        let filter_map = big_depth.depth_mut();
        filter_map.fill(f32::INFINITY);

        for i in 0..self.distort_map.len() {
            let index = self.distort_map[i];
            if index < 0 {
                self.color_offsets[i] = -1;
                undistorted_data[i] = 0.0;
                continue;
            }

            let z = depth_data[index as usize];
            undistorted_data[i] = z;
            // Also rejects NaN.
            if !(z > 0.0) {
                self.color_offsets[i] = -1;
                continue;
            }

            let rx = (self.map_x[i] + shift_m / z) * color_fx + color_cx;
            let cx = rx as i64;
            let cy = self.map_yi[i] as i64;
            if cx < 0 || cx >= cw || cy < 0 || cy >= ch {
                self.color_offsets[i] = -1;
                continue;
            }
            self.color_offsets[i] = cy * cw + cx;

            // Keep the nearest depth over a small window so that background
            // samples hidden behind a closer surface can be dropped below.
            for r in -FILTER_HEIGHT_HALF..=FILTER_HEIGHT_HALF {
                let row = cy + r + FILTER_HEIGHT_HALF;
                let col_start = (cx - FILTER_WIDTH_HALF).max(0);
                let col_end = (cx + FILTER_WIDTH_HALF).min(cw - 1);
                for col in col_start..=col_end {
                    let slot = &mut filter_map[(row * cw + col) as usize];
                    if z < *slot {
                        *slot = z;
                    }
                }
            }
        }

        let color_data = color.pixels();
        let undistorted_data = undistorted.depth();
        let filter_map = big_depth.depth();
        let registered_data = registered.pixels_mut();
        let border = FILTER_HEIGHT_HALF * cw;

        for (i, out) in registered_data.iter_mut().enumerate() {
            let c_off = self.color_offsets[i];
            if c_off < 0 {
                *out = 0;
                continue;
            }
            let min_z = filter_map[(border + c_off) as usize];
            let z = undistorted_data[i];
            *out = if (z - min_z) / z > FILTER_TOLERANCE {
                0
            } else {
                color_data[c_off as usize]
            };
        }

        Ok(())
    }
}

fn check_geometry(frame: &Frame, width: u32, height: u32) -> Result<(), RegistrationError> {
    if frame.width != width || frame.height != height || !frame.is_well_formed() {
        return Err(RegistrationError::GeometryMismatch {
            kind: frame.kind,
            width,
            height,
            actual_width: frame.width,
            actual_height: frame.height,
        });
    }
    Ok(())
}
