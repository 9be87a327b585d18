//! A driver-less depth camera for running without hardware.
//!
//! Produces a scrolling color gradient, an IR ramp and a tilted depth plane
//! at a fixed interval. Released frame sets are recycled, the way a real
//! driver reuses its transfer buffers. Only the CPU pipeline is offered.

use crate::calibration::Calibration;
use crate::device::{DepthDevice, DeviceError, Driver, PipelineKind};
use crate::frame::{bgrx, Frame, FrameKind, FrameSet};
use crate::registration::SensorGeometry;
use std::time::{Duration, Instant};

const SYNTHETIC_SERIAL: &str = "synthetic-000000000001";
/// Released sets kept for reuse.
const POOL_CAPACITY: usize = 4;

/// Settings for [`SyntheticDriver`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Time between frame sets.
    pub frame_interval: Duration,
    pub geometry: SensorGeometry,
    pub calibration: Calibration,
    /// Stop delivering after this many sets, as if the sensor were unplugged.
    pub stall_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            geometry: SensorGeometry::KINECT_V2,
            calibration: Calibration::nominal(),
            stall_after: None,
        }
    }
}

pub struct SyntheticDriver {
    config: SyntheticConfig,
}

impl SyntheticDriver {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl Driver for SyntheticDriver {
    fn supports(&self, pipeline: PipelineKind) -> bool {
        pipeline == PipelineKind::Cpu
    }

    fn open_default_device(
        &self,
        pipeline: PipelineKind,
    ) -> Result<Box<dyn DepthDevice + Send>, DeviceError> {
        if !self.supports(pipeline) {
            return Err(DeviceError::PipelineUnavailable(pipeline));
        }
        tracing::info!(serial = SYNTHETIC_SERIAL, %pipeline, "opened synthetic device");
        Ok(Box::new(SyntheticDevice::new(self.config.clone())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Streaming,
    Stopped,
    Closed,
}

pub struct SyntheticDevice {
    config: SyntheticConfig,
    state: StreamState,
    pool: Vec<FrameSet>,
    sequence: u32,
    delivered: u64,
    next_due: Instant,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            state: StreamState::Idle,
            pool: Vec::with_capacity(POOL_CAPACITY),
            sequence: 0,
            delivered: 0,
            next_due: Instant::now(),
        }
    }

    /// Number of released sets waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    fn take_buffers(&mut self) -> FrameSet {
        self.pool.pop().unwrap_or_else(|| {
            let g = self.config.geometry;
            FrameSet {
                color: Frame::new(FrameKind::Color, g.color_width, g.color_height),
                ir: Frame::new(FrameKind::Infrared, g.depth_width, g.depth_height),
                depth: Frame::new(FrameKind::Depth, g.depth_width, g.depth_height),
            }
        })
    }

    fn render(&self, set: &mut FrameSet) {
        let seq = self.sequence;
        let shift = seq as usize;

        let width = set.color.width as usize;
        for (y, row) in set.color.data.chunks_exact_mut(width).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                *px = bgrx((x + shift) as u8, y as u8, (seq.wrapping_mul(4)) as u8);
            }
        }

        let width = set.ir.width as usize;
        for (y, row) in set.ir.depth_mut().chunks_exact_mut(width).enumerate() {
            for (x, v) in row.iter_mut().enumerate() {
                *v = ((x * 64 + y * 32) % 65536) as f32;
            }
        }

        // A plane tilting away from the sensor, drifting with the sequence.
        let width = set.depth.width as usize;
        let drift = (seq % 100) as f32 * 10.0;
        for (y, row) in set.depth.depth_mut().chunks_exact_mut(width).enumerate() {
            for (x, v) in row.iter_mut().enumerate() {
                *v = 800.0 + 2.0 * x as f32 + 6.0 * y as f32 + drift;
            }
        }

        set.color.sequence = seq;
        set.ir.sequence = seq;
        set.depth.sequence = seq;
    }
}

impl DepthDevice for SyntheticDevice {
    fn serial(&self) -> &str {
        SYNTHETIC_SERIAL
    }

    fn calibration(&self) -> Calibration {
        self.config.calibration
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        match self.state {
            StreamState::Closed => Err(DeviceError::Closed),
            _ => {
                self.state = StreamState::Streaming;
                self.next_due = Instant::now() + self.config.frame_interval;
                tracing::debug!(serial = SYNTHETIC_SERIAL, "streaming started");
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        match self.state {
            StreamState::Closed => Err(DeviceError::Closed),
            _ => {
                self.state = StreamState::Stopped;
                tracing::debug!(serial = SYNTHETIC_SERIAL, "streaming stopped");
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.state == StreamState::Closed {
            return Err(DeviceError::Closed);
        }
        self.state = StreamState::Closed;
        self.pool.clear();
        tracing::debug!(serial = SYNTHETIC_SERIAL, "device closed");
        Ok(())
    }

    fn wait_for_frame_set(&mut self, timeout: Duration) -> Result<Option<FrameSet>, DeviceError> {
        match self.state {
            StreamState::Streaming => {}
            StreamState::Closed => return Err(DeviceError::Closed),
            StreamState::Idle | StreamState::Stopped => return Err(DeviceError::NotStreaming),
        }

        let stalled = self
            .config
            .stall_after
            .is_some_and(|limit| self.delivered >= limit);
        let wait = self.next_due.saturating_duration_since(Instant::now());
        if stalled || wait > timeout {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        std::thread::sleep(wait);

        let mut set = self.take_buffers();
        self.render(&mut set);
        self.sequence = self.sequence.wrapping_add(1);
        self.delivered += 1;
        self.next_due = Instant::now() + self.config.frame_interval;
        Ok(Some(set))
    }

    fn release_frame_set(&mut self, set: FrameSet) {
        if self.state != StreamState::Closed && self.pool.len() < POOL_CAPACITY {
            self.pool.push(set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SyntheticConfig {
        SyntheticConfig {
            frame_interval: Duration::from_millis(1),
            geometry: SensorGeometry {
                depth_width: 8,
                depth_height: 6,
                color_width: 16,
                color_height: 12,
            },
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn test_only_cpu_pipeline() {
        let driver = SyntheticDriver::new(small_config());
        assert!(driver.supports(PipelineKind::Cpu));
        assert!(matches!(
            driver.open_default_device(PipelineKind::CudaKde),
            Err(DeviceError::PipelineUnavailable(PipelineKind::CudaKde))
        ));
        assert!(driver.open_default_device(PipelineKind::Cpu).is_ok());
    }

    #[test]
    fn test_wait_requires_streaming() {
        let mut device = SyntheticDevice::new(small_config());
        let result = device.wait_for_frame_set(Duration::from_millis(5));
        assert!(matches!(result, Err(DeviceError::NotStreaming)));
    }

    #[test]
    fn test_delivers_complete_sets() {
        let mut device = SyntheticDevice::new(small_config());
        device.start().unwrap();

        let first = device
            .wait_for_frame_set(Duration::from_millis(500))
            .unwrap()
            .unwrap();
        assert_eq!((first.color.width, first.color.height), (16, 12));
        assert_eq!((first.depth.width, first.depth.height), (8, 6));
        assert!(first.color.is_well_formed());
        assert!(first.ir.is_well_formed());
        assert!(first.depth.depth().iter().all(|&z| z > 0.0));
        device.release_frame_set(first);
        assert_eq!(device.pooled(), 1);

        let second = device
            .wait_for_frame_set(Duration::from_millis(500))
            .unwrap()
            .unwrap();
        assert_eq!(second.sequence(), 1);
        assert_eq!(device.pooled(), 0);
    }

    #[test]
    fn test_stall_times_out() {
        let mut device = SyntheticDevice::new(SyntheticConfig {
            stall_after: Some(1),
            ..small_config()
        });
        device.start().unwrap();

        assert!(device
            .wait_for_frame_set(Duration::from_millis(500))
            .unwrap()
            .is_some());
        assert!(device
            .wait_for_frame_set(Duration::from_millis(5))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_double_close_is_an_error() {
        let mut device = SyntheticDevice::new(small_config());
        device.start().unwrap();
        device.stop().unwrap();
        device.close().unwrap();
        assert!(matches!(device.close(), Err(DeviceError::Closed)));
    }
}
