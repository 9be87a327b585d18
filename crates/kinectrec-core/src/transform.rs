//! Pixel-buffer transforms: horizontal flip and depth/color registration.

use kinectrec_hw::{Calibration, Frame, Registration, RegistrationError, SensorGeometry};

/// Mirror a frame along its vertical axis, in place.
///
/// Works on 4-byte elements, so packed BGRX color and float depth are
/// handled alike. Applying it twice restores the original frame.
pub fn flip_horizontal(frame: &mut Frame) {
    let width = frame.width as usize;
    if width == 0 {
        return;
    }
    for row in frame.data.chunks_exact_mut(width) {
        row.reverse();
    }
}

/// Registration tables plus the output buffers reused on every frame set.
///
/// Created once from the device calibration. Outputs are only reachable
/// through [`RegisteredViews`], which borrow the context, so a view cannot
/// be held across the next call to
/// [`register_depth_to_color`](Self::register_depth_to_color).
pub struct RegistrationContext {
    registration: Registration,
    undistorted: Frame,
    registered: Frame,
    big_depth: Frame,
}

/// Outputs of one registration, valid until the context is used again.
pub struct RegisteredViews<'a> {
    /// Depth at native resolution with lens distortion removed.
    pub undistorted: &'a Frame,
    /// Color resampled into depth space.
    pub registered: &'a Frame,
    /// Depth at color resolution, plus one border row above and below.
    pub big_depth: &'a mut Frame,
}

impl RegistrationContext {
    pub fn new(calibration: &Calibration) -> Self {
        Self::from_registration(Registration::new(calibration))
    }

    pub fn with_geometry(calibration: &Calibration, geometry: SensorGeometry) -> Self {
        Self::from_registration(Registration::with_geometry(calibration, geometry))
    }

    fn from_registration(registration: Registration) -> Self {
        let (undistorted, registered, big_depth) = registration.allocate_outputs();
        Self {
            registration,
            undistorted,
            registered,
            big_depth,
        }
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.registration.geometry()
    }

    /// Register `depth` against `color` into the context's buffers.
    pub fn register_depth_to_color(
        &mut self,
        color: &Frame,
        depth: &Frame,
    ) -> Result<RegisteredViews<'_>, RegistrationError> {
        self.registration.apply(
            color,
            depth,
            &mut self.undistorted,
            &mut self.registered,
            &mut self.big_depth,
        )?;

        let sequence = color.sequence;
        self.undistorted.sequence = sequence;
        self.registered.sequence = sequence;
        self.big_depth.sequence = sequence;

        Ok(RegisteredViews {
            undistorted: &self.undistorted,
            registered: &self.registered,
            big_depth: &mut self.big_depth,
        })
    }
}
