//! kinectrec-core — Frame processing and recording engine.
//!
//! Flips and registers frame sets, encodes each frame kind to its image
//! format and writes one file per kind per capture into a timestamped
//! directory layout. The capture loop drives it all against any
//! [`kinectrec_hw::DepthDevice`].

pub mod capture;
pub mod encoder;
pub mod session;
pub mod storage;
pub mod transform;

pub use capture::{
    run_capture, CancelToken, CaptureConfig, CaptureError, CaptureState, CaptureSummary,
};
pub use encoder::{EncodeError, Encoding};
pub use session::{CaptureSession, Clock, SystemClock};
pub use storage::{SaveError, SaveReport, StorageError, StorageLayout, WriteMode};
pub use transform::{flip_horizontal, RegisteredViews, RegistrationContext};
