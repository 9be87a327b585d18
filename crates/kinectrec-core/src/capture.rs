//! The capture loop.
//!
//! ```text
//! Idle -> Listening -> FrameReady -> Processing -> Listening
//!            |                                  \-> Terminated (cancel token)
//!            \-> FailedTimeout (no set before the deadline) | Failed (device error)
//! ```
//!
//! The blocking wait for a frame set is the only suspension point. The
//! cancel token is polled once per iteration, before waiting, so a frame set
//! that has been handed over is always fully written. Every exit after a
//! successful start runs the same teardown exactly once.

use crate::session::CaptureSession;
use crate::transform::{flip_horizontal, RegisteredViews};
use kinectrec_hw::{DepthDevice, DeviceError, Frame, FrameSetLease};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long to wait for a frame set before treating the sensor as gone.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Listening,
    FrameReady,
    Processing,
    Terminated,
    FailedTimeout,
    Failed,
}

/// Cooperative stop flag shared between the capture thread and whoever ends the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub wait_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            wait_timeout: WAIT_TIMEOUT,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default)]
pub struct CaptureSummary {
    pub frame_sets: u64,
    pub files_saved: u64,
    pub failed_saves: u64,
    pub registration_failures: u64,
    pub final_state: CaptureState,
    /// A stop was requested, even if the run ended some other way.
    pub stop_requested: bool,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start device: {0}")]
    Start(#[source] DeviceError),
    #[error("no frame set obtained within {} ms", timeout.as_millis())]
    AcquisitionTimeout {
        timeout: Duration,
        summary: CaptureSummary,
    },
    #[error("device failed while waiting for frames: {source}")]
    Device {
        source: DeviceError,
        summary: CaptureSummary,
    },
}

enum LoopExit {
    Cancelled,
    TimedOut,
    DeviceFailed(DeviceError),
}

/// Record frame sets from `device` until cancelled or the sensor goes quiet.
///
/// Starts the stream, loops, then stops and closes the device. A device
/// that fails to start is closed and nothing is recorded.
pub fn run_capture<D: DepthDevice + ?Sized>(
    device: &mut D,
    session: CaptureSession,
    config: &CaptureConfig,
    cancel: &CancelToken,
) -> Result<CaptureSummary, CaptureError> {
    let mut session = session;
    let mut state = CaptureState::Idle;

    if let Err(e) = device.start() {
        tracing::error!(serial = device.serial(), error = %e, "device failed to start");
        if let Err(close_err) = device.close() {
            tracing::warn!(error = %close_err, "failed to close device after failed start");
        }
        return Err(CaptureError::Start(e));
    }
    transition(&mut state, CaptureState::Listening);

    let kinds: Vec<&str> = session.layout.enabled_kinds().map(|k| k.name()).collect();
    tracing::info!(
        serial = device.serial(),
        base = %session.layout.base().display(),
        ?kinds,
        "capture started, press Ctrl-C to stop"
    );

    let mut summary = CaptureSummary::default();
    let exit = listen(device, &mut session, config, cancel, &mut state, &mut summary);
    summary.final_state = state;

    teardown(device);
    drop(session);

    tracing::info!(
        frame_sets = summary.frame_sets,
        files_saved = summary.files_saved,
        failed_saves = summary.failed_saves,
        state = ?summary.final_state,
        "capture finished"
    );

    match exit {
        LoopExit::Cancelled => Ok(summary),
        LoopExit::TimedOut => Err(CaptureError::AcquisitionTimeout {
            timeout: config.wait_timeout,
            summary,
        }),
        LoopExit::DeviceFailed(source) => Err(CaptureError::Device { source, summary }),
    }
}

fn listen<D: DepthDevice + ?Sized>(
    device: &mut D,
    session: &mut CaptureSession,
    config: &CaptureConfig,
    cancel: &CancelToken,
    state: &mut CaptureState,
    summary: &mut CaptureSummary,
) -> LoopExit {
    loop {
        if cancel.is_cancelled() {
            tracing::info!("stop requested");
            summary.stop_requested = true;
            transition(state, CaptureState::Terminated);
            return LoopExit::Cancelled;
        }

        let lease = match FrameSetLease::acquire(&mut *device, config.wait_timeout) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::error!(
                    timeout_ms = config.wait_timeout.as_millis() as u64,
                    "no frame set obtained before the deadline"
                );
                if cancel.is_cancelled() {
                    summary.stop_requested = true;
                    tracing::warn!("stop was requested during the wait, but the sensor stalled first");
                }
                transition(state, CaptureState::FailedTimeout);
                return LoopExit::TimedOut;
            }
            Err(e) => {
                tracing::error!(error = %e, "waiting for frame set failed");
                transition(state, CaptureState::Failed);
                return LoopExit::DeviceFailed(e);
            }
        };
        transition(state, CaptureState::FrameReady);

        transition(state, CaptureState::Processing);
        process_frame_set(lease, session, summary);
        transition(state, CaptureState::Listening);
    }
}

/// Register, flip and save one frame set. The lease is released on return.
fn process_frame_set<D: DepthDevice + ?Sized>(
    mut lease: FrameSetLease<'_, D>,
    session: &mut CaptureSession,
    summary: &mut CaptureSummary,
) {
    let iteration = session.next_iteration();
    let timestamp = session.now_ms();
    tracing::debug!(iteration, sequence = lease.sequence(), timestamp, "new frame set obtained");

    let set = &mut *lease;
    let views = match session
        .registration
        .register_depth_to_color(&set.color, &set.depth)
    {
        Ok(views) => Some(views),
        Err(e) => {
            summary.registration_failures += 1;
            tracing::warn!(iteration, error = %e, "registration failed, skipping registered outputs");
            None
        }
    };

    flip_horizontal(&mut set.color);

    let mut frames: Vec<&Frame> = vec![&set.color, &set.ir, &set.depth];
    if let Some(RegisteredViews {
        registered,
        big_depth,
        ..
    }) = views
    {
        flip_horizontal(big_depth);
        frames.push(registered);
        frames.push(big_depth);
    }

    let report = session.layout.save_frame_set(&frames, timestamp);
    summary.frame_sets += 1;
    summary.files_saved += report.saved.len() as u64;
    summary.failed_saves += report.failures.len() as u64;
}

fn teardown<D: DepthDevice + ?Sized>(device: &mut D) {
    if let Err(e) = device.stop() {
        tracing::warn!(error = %e, "failed to stop device");
    }
    if let Err(e) = device.close() {
        tracing::warn!(error = %e, "failed to close device");
    }
    tracing::info!(serial = device.serial(), "device stopped and closed");
}

fn transition(state: &mut CaptureState, next: CaptureState) {
    tracing::trace!(from = ?*state, to = ?next, "capture state");
    *state = next;
}
