use std::time::Duration;

/// Recorder configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// How long to wait for a frame set before giving up (default: 5000 ms).
    pub wait_timeout: Duration,
    /// Write the frames of one set on parallel threads.
    pub parallel_writes: bool,
    /// Frame interval of the synthetic device (default: 33 ms).
    pub frame_interval: Duration,
}

impl Config {
    /// Load configuration from `KINECTREC_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            wait_timeout: Duration::from_millis(env_u64(
                &lookup,
                "KINECTREC_WAIT_TIMEOUT_MS",
                5000,
            )),
            parallel_writes: lookup("KINECTREC_PARALLEL_WRITES")
                .map(|v| v != "0")
                .unwrap_or(false),
            frame_interval: Duration::from_millis(env_u64(
                &lookup,
                "KINECTREC_FRAME_INTERVAL_MS",
                33,
            )),
        }
    }
}

fn env_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
