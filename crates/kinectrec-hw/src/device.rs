//! Device and driver traits, pipeline selection and frame-set leases.

use crate::calibration::Calibration;
use crate::frame::FrameSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("pipeline {0} is not available in this driver")]
    PipelineUnavailable(PipelineKind),
    #[error("unknown pipeline: {0} (expected cpu, opencl, opencl-kde, cuda or cuda-kde)")]
    UnknownPipeline(String),
    #[error("failed to start streaming: {0}")]
    StartFailed(String),
    #[error("device is not streaming")]
    NotStreaming,
    #[error("device is closed")]
    Closed,
    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Processing backend used by the driver to decode raw sensor packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Cpu,
    OpenCl,
    /// OpenCL with kernel density estimation phase unwrapping.
    OpenClKde,
    Cuda,
    /// CUDA with kernel density estimation phase unwrapping.
    CudaKde,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 5] = [
        PipelineKind::Cpu,
        PipelineKind::OpenCl,
        PipelineKind::OpenClKde,
        PipelineKind::Cuda,
        PipelineKind::CudaKde,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PipelineKind::Cpu => "cpu",
            PipelineKind::OpenCl => "opencl",
            PipelineKind::OpenClKde => "opencl-kde",
            PipelineKind::Cuda => "cuda",
            PipelineKind::CudaKde => "cuda-kde",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PipelineKind {
    type Err = DeviceError;

    /// Exactly one variant matches; short aliases `cl`, `clkde` and
    /// `cudakde` are accepted alongside the canonical names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(PipelineKind::Cpu),
            "opencl" | "cl" => Ok(PipelineKind::OpenCl),
            "opencl-kde" | "clkde" => Ok(PipelineKind::OpenClKde),
            "cuda" => Ok(PipelineKind::Cuda),
            "cuda-kde" | "cudakde" => Ok(PipelineKind::CudaKde),
            other => Err(DeviceError::UnknownPipeline(other.to_string())),
        }
    }
}

/// An opened depth camera.
///
/// The driver acquires on its own threads and hands over complete frame
/// sets through [`wait_for_frame_set`](Self::wait_for_frame_set). Every set
/// handed out must come back through
/// [`release_frame_set`](Self::release_frame_set); use [`FrameSetLease`]
/// rather than calling the pair by hand.
pub trait DepthDevice {
    fn serial(&self) -> &str;

    /// Factory calibration of both sensors.
    fn calibration(&self) -> Calibration;

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;

    /// Block until a complete color/IR/depth set is available.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first.
    fn wait_for_frame_set(&mut self, timeout: Duration) -> Result<Option<FrameSet>, DeviceError>;

    /// Return a frame set's buffers to the driver.
    fn release_frame_set(&mut self, set: FrameSet);
}

/// Entry point of a driver binding.
pub trait Driver {
    /// Whether this driver was built with the given processing backend.
    fn supports(&self, pipeline: PipelineKind) -> bool;

    /// Open the first connected device using `pipeline`.
    fn open_default_device(
        &self,
        pipeline: PipelineKind,
    ) -> Result<Box<dyn DepthDevice + Send>, DeviceError>;
}

/// A frame set borrowed from a device, released back to it on drop.
pub struct FrameSetLease<'d, D: DepthDevice + ?Sized> {
    device: &'d mut D,
    set: Option<FrameSet>,
}

impl<'d, D: DepthDevice + ?Sized> FrameSetLease<'d, D> {
    /// Wait for the next frame set. `Ok(None)` on timeout.
    pub fn acquire(device: &'d mut D, timeout: Duration) -> Result<Option<Self>, DeviceError> {
        Ok(device
            .wait_for_frame_set(timeout)?
            .map(|set| Self {
                device,
                set: Some(set),
            }))
    }
}

impl<D: DepthDevice + ?Sized> Deref for FrameSetLease<'_, D> {
    type Target = FrameSet;

    fn deref(&self) -> &FrameSet {
        // Only taken in Drop.
        self.set.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<D: DepthDevice + ?Sized> DerefMut for FrameSetLease<'_, D> {
    fn deref_mut(&mut self) -> &mut FrameSet {
        self.set.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<D: DepthDevice + ?Sized> Drop for FrameSetLease<'_, D> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            tracing::trace!(sequence = set.sequence(), "releasing frame set");
            self.device.release_frame_set(set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameKind};

    /// Hands out a fixed number of sets and counts releases.
    struct MockDevice {
        remaining: usize,
        released: Vec<u32>,
    }

    impl DepthDevice for MockDevice {
        fn serial(&self) -> &str {
            "mock"
        }

        fn calibration(&self) -> Calibration {
            Calibration::nominal()
        }

        fn start(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn wait_for_frame_set(
            &mut self,
            _timeout: Duration,
        ) -> Result<Option<FrameSet>, DeviceError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            let mut color = Frame::new(FrameKind::Color, 2, 2);
            color.sequence = self.remaining as u32;
            Ok(Some(FrameSet {
                color,
                ir: Frame::new(FrameKind::Infrared, 2, 2),
                depth: Frame::new(FrameKind::Depth, 2, 2),
            }))
        }

        fn release_frame_set(&mut self, set: FrameSet) {
            self.released.push(set.sequence());
        }
    }

    #[test]
    fn test_pipeline_names_parse() {
        for kind in PipelineKind::ALL {
            assert_eq!(kind.name().parse::<PipelineKind>().unwrap(), kind);
        }
        assert_eq!("cudakde".parse::<PipelineKind>().unwrap(), PipelineKind::CudaKde);
        assert_eq!("cl".parse::<PipelineKind>().unwrap(), PipelineKind::OpenCl);
        assert_eq!("clkde".parse::<PipelineKind>().unwrap(), PipelineKind::OpenClKde);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DeviceError::PipelineUnavailable(PipelineKind::Cuda).to_string(),
            "pipeline cuda is not available in this driver"
        );
        assert_eq!(DeviceError::NotStreaming.to_string(), "device is not streaming");
        assert_eq!(
            DeviceError::Transfer("endpoint halted".into()).to_string(),
            "transfer failed: endpoint halted"
        );
    }

    #[test]
    fn test_unknown_pipeline() {
        let err = "vulkan".parse::<PipelineKind>().unwrap_err();
        assert!(matches!(err, DeviceError::UnknownPipeline(ref name) if name == "vulkan"));
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let mut device = MockDevice {
            remaining: 2,
            released: Vec::new(),
        };

        {
            let mut lease = FrameSetLease::acquire(&mut device, Duration::from_millis(10))
                .unwrap()
                .unwrap();
            lease.color.data[0] = 42;
            assert_eq!(lease.sequence(), 1);
        }
        assert_eq!(device.released, vec![1]);
    }

    #[test]
    fn test_lease_released_on_early_return() {
        fn process(device: &mut MockDevice) -> Result<(), &'static str> {
            let _lease = FrameSetLease::acquire(device, Duration::from_millis(10))
                .map_err(|_| "wait failed")?
                .ok_or("timeout")?;
            Err("encode failed")
        }

        let mut device = MockDevice {
            remaining: 1,
            released: Vec::new(),
        };
        assert!(process(&mut device).is_err());
        assert_eq!(device.released, vec![0]);
    }

    #[test]
    fn test_lease_timeout() {
        let mut device = MockDevice {
            remaining: 0,
            released: Vec::new(),
        };
        let timed_out = FrameSetLease::acquire(&mut device, Duration::from_millis(10))
            .unwrap()
            .is_none();
        assert!(timed_out);
        assert!(device.released.is_empty());
    }
}
