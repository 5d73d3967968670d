pub mod capture;
pub mod error;
pub mod pipeline;

use std::path::Path;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{ArrayView, Frame, WorkResult};
pub use error::{ConvertError, PipelineError};
pub use pipeline::{Processor, Worker, WorkItem};

/// Environment prefix for configuration overrides, e.g.
/// `FRAMEPIPE__PROCESSOR__SKIP_IF_RUNNING=false`.
pub const ENV_PREFIX: &str = "FRAMEPIPE";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processor: ProcessorConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Drop superseded input while the worker is busy. Only the newest
    /// pending item survives.
    pub skip_if_running: bool,
    /// Per-subscriber capacity of the result channels. `0` is unbounded.
    pub result_capacity: usize,
    /// Pin the processing thread to this core id.
    pub pin_core: Option<usize>,
    pub thread_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Frames to emit before end-of-stream. `None` streams forever.
    pub frame_count: Option<u64>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            skip_if_running: true,
            result_capacity: 0,
            pin_core: None,
            thread_name: "framepipe-worker".into(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 30,
            format: PixelFormat::Rgb24,
            frame_count: Some(300),
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `FRAMEPIPE__*` environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}

/// Snapshot of the counters collected by a [`Processor`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Items accepted by `submit`
    pub submitted: u64,
    /// Items handed to the processing thread
    pub dispatched: u64,
    /// Items superseded in the mailbox or discarded on stop
    pub skipped: u64,
    /// Results published on the result channel
    pub delivered: u64,
    /// Items whose worker returned an error or panicked
    pub failed: u64,
    /// Deliveries dropped because a bounded subscriber was full
    pub dropped_deliveries: u64,
    pub avg_process_us: u64,
}
