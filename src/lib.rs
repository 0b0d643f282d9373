//! Sleep Detector - Heart-rate based sleep episode detection service
//!
//! Wearable readings and activity pulses are folded into one aggregate per
//! tick: buffered samples → median → episode tracking → threshold
//! calibration → sleep-onset notification.
//!
//! ## Modules
//!
//! - **Ingestion**: sample buffering and activity debouncing
//! - **Detection**: episode state machine, threshold calibration, notification latch
//! - **Service**: the tick loop, HTTP surface and storage backends

pub mod activity;
pub mod buffer;
pub mod calibrator;
pub mod config;
pub mod error;
pub mod http;
pub mod latch;
pub mod logging;
pub mod notifier;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;

pub use config::DetectorConfig;
pub use error::DetectorError;
pub use service::{DetectorHandle, IngestRequest, SleepDetector, TickReport};
pub use store::{MemoryStore, SleepStore, SqliteStore};
pub use types::{EffectiveHeartRate, HeartRateSample, SleepEpisode, TickSignal};

/// Crate version reported by the CLI
pub const DETECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name used in logs and reports
pub const SERVICE_NAME: &str = "sleep-detector";
