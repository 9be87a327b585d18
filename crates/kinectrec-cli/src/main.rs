use anyhow::{Context, Result};
use clap::Parser;
use kinectrec_core::{
    run_capture, CancelToken, CaptureConfig, CaptureError, CaptureSession, CaptureSummary,
    RegistrationContext, StorageLayout, WriteMode,
};
use kinectrec_hw::{
    Calibration, Driver, FrameKind, PipelineKind, SyntheticConfig, SyntheticDriver,
};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

// A run stopped by SIGINT or SIGTERM exits with 0 after the usual teardown.

/// Startup or fatal device error.
const EXIT_FAILURE: u8 = 1;
/// No frame set arrived within the wait timeout.
const EXIT_TIMEOUT: u8 = 2;

#[derive(Parser)]
#[command(
    name = "kinectrec",
    about = "Record synchronized color, IR and depth frames to disk"
)]
struct Cli {
    /// Base directory; one subdirectory is created per recorded frame kind
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Processing pipeline: cpu, opencl (cl), opencl-kde (clkde), cuda, cuda-kde (cudakde)
    #[arg(short, long, default_value = "cpu")]
    pipeline: String,

    /// Frame kinds to record, comma separated: rgb, ir, depth, registered, bigdepth
    #[arg(short, long, value_delimiter = ',', default_value = "rgb,bigdepth")]
    kinds: Vec<FrameKind>,

    /// TOML file overriding the device's factory calibration
    #[arg(short, long)]
    calibration: Option<PathBuf>,

    /// Write the frames of one set on parallel threads
    #[arg(long)]
    parallel_writes: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version land here too.
            return if e.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(summary) => {
            tracing::info!(
                frame_sets = summary.frame_sets,
                files_saved = summary.files_saved,
                "kinectrec stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            match e.downcast_ref::<CaptureError>() {
                Some(CaptureError::AcquisitionTimeout { summary, .. }) => {
                    if summary.stop_requested {
                        tracing::warn!("a stop was requested, but the sensor timed out first");
                    }
                    ExitCode::from(EXIT_TIMEOUT)
                }
                _ => ExitCode::from(EXIT_FAILURE),
            }
        }
    }
}

async fn run(cli: Cli) -> Result<CaptureSummary> {
    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let pipeline: PipelineKind = cli.pipeline.parse().context("invalid --pipeline")?;

    let calibration_override = cli
        .calibration
        .as_deref()
        .map(Calibration::load)
        .transpose()
        .context("failed to load calibration override")?;

    let write_mode = if cli.parallel_writes || config.parallel_writes {
        WriteMode::Parallel
    } else {
        WriteMode::Sequential
    };
    let layout = StorageLayout::new(&cli.output_dir, cli.kinds).with_write_mode(write_mode);
    layout.prepare().with_context(|| {
        format!(
            "failed to prepare output directory {}",
            cli.output_dir.display()
        )
    })?;

    let driver = SyntheticDriver::new(SyntheticConfig {
        frame_interval: config.frame_interval,
        ..SyntheticConfig::default()
    });
    let mut device = driver
        .open_default_device(pipeline)
        .with_context(|| format!("failed to open device with the {pipeline} pipeline"))?;
    tracing::info!(serial = device.serial(), %pipeline, "device opened");

    let calibration = calibration_override.unwrap_or_else(|| device.calibration());
    let session = CaptureSession::new(layout, RegistrationContext::new(&calibration));
    let capture_config = CaptureConfig {
        wait_timeout: config.wait_timeout,
    };

    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let capture = tokio::task::spawn_blocking(move || {
        run_capture(&mut *device, session, &capture_config, &worker_cancel)
    });

    let joined = supervise(capture, &cancel, shutdown_signal()).await;
    let summary = joined.context("capture thread panicked")??;
    Ok(summary)
}

/// Wait for the capture task, stopping it cooperatively if `shutdown`
/// resolves first. Either way the task runs to completion, teardown included.
async fn supervise<T>(
    mut capture: JoinHandle<T>,
    cancel: &CancelToken,
    shutdown: impl Future<Output = &'static str>,
) -> Result<T, JoinError> {
    tokio::select! {
        joined = &mut capture => joined,
        signal = shutdown => {
            tracing::info!(signal, "shutdown requested, finishing current frame set");
            cancel.cancel();
            capture.await
        }
    }
}

/// Resolve with the name of the first shutdown signal received.
///
/// A signal whose handler cannot be installed is logged and never fires.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}
