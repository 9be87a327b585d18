//! kinectrec-hw — Driver seam for synchronized depth cameras.
//!
//! Frame and frame-set types, the device/driver traits with scoped
//! frame-set leases, sensor calibration, CPU depth/color registration and
//! a synthetic device for running without hardware.

pub mod calibration;
pub mod device;
pub mod frame;
pub mod registration;
pub mod synthetic;

pub use calibration::{Calibration, CalibrationError, ColorParams, IrParams};
pub use device::{DepthDevice, DeviceError, Driver, FrameSetLease, PipelineKind};
pub use frame::{Frame, FrameError, FrameKind, FrameSet};
pub use registration::{Registration, RegistrationError, SensorGeometry};
pub use synthetic::{SyntheticConfig, SyntheticDevice, SyntheticDriver};
