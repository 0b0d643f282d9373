//! Detector service
//!
//! `SleepDetector` owns all shared mutable state behind one mutex: the sample
//! buffer, the activity flag and its timer, the episode tracker, the
//! threshold and the notification latch. Ingestion and the tick both go
//! through that lock. The tick performs its store and webhook I/O with the
//! lock released and re-acquires it only to commit results.

use crate::activity::{ActivityDebouncer, ActivityState};
use crate::buffer::SampleBuffer;
use crate::calibrator::ThresholdCalibrator;
use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::latch::{is_asleep_now, NotificationLatch};
use crate::notifier::Notifier;
use crate::scheduler::{spawn_tick_loop, ScheduledTask};
use crate::store::SleepStore;
use crate::tracker::{finalize_episode, EpisodeTracker, TrackerState, Transition};
use crate::types::{SleepEpisode, TickRecord, TickSignal};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default number of episodes returned by the history query
pub const DEFAULT_HISTORY_COUNT: usize = 10;

/// Body of an ingestion request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestRequest {
    /// Motion pulse
    pub activity: bool,
    /// Raw heart-rate reading (bpm)
    pub heartrate: Option<f64>,
}

impl IngestRequest {
    /// Interpret a decoded JSON body.
    ///
    /// `activity` follows JSON truthiness (non-zero numbers and non-empty
    /// strings count). `heartrate` must be a number when present.
    pub fn from_value(body: &Value) -> Result<Self, DetectorError> {
        let object = body.as_object().ok_or_else(|| {
            DetectorError::InvalidPayload("body must be a JSON object".to_string())
        })?;

        let activity = object.get("activity").is_some_and(is_truthy);
        let heartrate = match object.get("heartrate") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(other) => {
                return Err(DetectorError::InvalidPayload(format!(
                    "heartrate must be a number, got {other}"
                )))
            }
        };

        Ok(Self {
            activity,
            heartrate,
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub signal: TickSignal,
    pub transition: Transition,
    /// Episode persisted by this tick, if any
    pub persisted: Option<SleepEpisode>,
    /// Threshold in force when the asleep predicate was evaluated
    pub threshold: u16,
    pub asleep: bool,
    /// Whether the notifier was invoked (regardless of its outcome)
    pub notified: bool,
}

#[derive(Debug)]
struct DetectorState {
    buffer: SampleBuffer,
    activity: ActivityDebouncer,
    tracker: EpisodeTracker,
    calibrator: ThresholdCalibrator,
    latch: NotificationLatch,
}

struct CloseOutcome {
    episode: Option<SleepEpisode>,
    threshold: Option<u16>,
}

/// Sleep detection service.
///
/// Construct explicitly, call [`SleepDetector::bootstrap`], then
/// [`SleepDetector::start`] to run the tick loop.
pub struct SleepDetector {
    config: DetectorConfig,
    state: Arc<Mutex<DetectorState>>,
    store: Arc<dyn SleepStore>,
    notifier: Arc<dyn Notifier>,
    tick_guard: tokio::sync::Mutex<()>,
}

impl SleepDetector {
    pub fn new(
        config: DetectorConfig,
        store: Arc<dyn SleepStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let state = DetectorState {
            buffer: SampleBuffer::new(config.hr_valid_low, config.hr_valid_high),
            activity: ActivityDebouncer::new(config.active_flag_timeout()),
            tracker: EpisodeTracker::new(config.minimal_sleep()),
            calibrator: ThresholdCalibrator::new(config.threshold_samples),
            latch: NotificationLatch::new(),
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            store,
            notifier,
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, DetectorError>
    where
        F: Future<Output = Result<T, DetectorError>>,
    {
        tokio::time::timeout(self.config.store_timeout(), fut)
            .await
            .map_err(|_| DetectorError::Timeout(operation))?
    }

    /// Create the schema and load the initial threshold.
    ///
    /// Failures are logged; the detector still runs with threshold 0.
    pub async fn bootstrap(&self) {
        if let Err(e) = self
            .bounded("schema creation", self.store.ensure_schema())
            .await
        {
            error!(error = %e, "failed to create store schema");
        }

        let samples = self.lock_state().calibrator.samples();
        match self
            .bounded(
                "threshold recompute",
                ThresholdCalibrator::recompute(self.store.as_ref(), samples),
            )
            .await
        {
            Ok(threshold) => {
                self.lock_state().calibrator.set_threshold(threshold);
                info!(threshold, "initial sleep threshold loaded");
            }
            Err(e) => warn!(error = %e, "failed to load initial threshold"),
        }
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Apply one ingestion request
    pub fn ingest(&self, request: &IngestRequest) {
        if request.activity {
            self.pulse_activity();
        }
        if let Some(bpm) = request.heartrate {
            self.record_heart_rate(bpm);
        }
    }

    /// Buffer a heart-rate reading. Out-of-band readings are dropped.
    pub fn record_heart_rate(&self, bpm: f64) -> bool {
        let accepted = self.lock_state().buffer.record_reading(Utc::now(), bpm);
        if !accepted {
            debug!(bpm, "heart-rate sample outside valid band ignored");
        }
        accepted
    }

    /// Register a motion pulse, extending the activity window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn pulse_activity(&self) {
        let mut state = self.lock_state();
        let deadline = state.activity.pulse(Instant::now());

        let shared = Arc::clone(&self.state);
        let clear = ScheduledTask::at(deadline, async move {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if state.activity.expire(Instant::now()) {
                info!("activity flag cleared");
            }
        });
        state.activity.arm(clear);
        debug!("activity flag set");
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Most recent persisted episodes, newest first
    pub async fn history(&self, count: usize) -> Result<Vec<SleepEpisode>, DetectorError> {
        self.bounded("history query", self.store.recent_episodes(count))
            .await
    }

    pub fn threshold(&self) -> u16 {
        self.lock_state().calibrator.threshold()
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().activity.is_active(Instant::now())
    }

    pub fn activity_state(&self) -> ActivityState {
        self.lock_state().activity.state(Instant::now())
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.lock_state().tracker.state()
    }

    pub fn is_tracking(&self) -> bool {
        self.lock_state().tracker.is_open()
    }

    pub fn buffered_samples(&self) -> usize {
        self.lock_state().buffer.len()
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one tick at the current wall-clock time
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`.
    ///
    /// Ticks are serialized; a concurrent call waits for the running one.
    /// Never fails: every I/O error is logged and the tick carries on.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let _serial = self.tick_guard.lock().await;
        let tick_id = Uuid::new_v4();
        let span = info_span!("tick", %tick_id);
        self.run_tick(tick_id, now).instrument(span).await
    }

    async fn run_tick(&self, tick_id: Uuid, now: DateTime<Utc>) -> TickReport {
        // Aggregate and advance the tracker
        let (active, signal, transition) = {
            let mut state = self.lock_state();
            let active = state.activity.is_active(Instant::now());
            let signal = state.buffer.drain_aggregate(active);
            let transition = state.tracker.step(signal, now);
            if matches!(transition, Transition::Discarded { .. }) {
                state.latch.reset();
            }
            (active, signal, transition)
        };
        debug!(?signal, ?transition, "tick aggregated");

        let mut persisted = None;
        if let Transition::Finalize { start, end } = transition {
            match self.close_episode(start, end).await {
                Ok(outcome) => {
                    let mut state = self.lock_state();
                    state.tracker.commit(start);
                    state.latch.reset();
                    if let Some(threshold) = outcome.threshold {
                        if threshold != state.calibrator.threshold() {
                            info!(threshold, "sleep threshold recalibrated");
                        }
                        state.calibrator.set_threshold(threshold);
                    }
                    persisted = outcome.episode;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        episode_start = %start,
                        "closing sleep episode failed, keeping it open"
                    );
                }
            }
        }

        // Edge-detect the asleep predicate
        let (threshold, asleep, fire) = {
            let mut state = self.lock_state();
            let threshold = state.calibrator.threshold();
            let asleep = is_asleep_now(active, signal.effective(), threshold);
            (threshold, asleep, state.latch.evaluate(asleep))
        };
        debug!(threshold, asleep, effective_hr = ?signal.value(), "asleep predicate evaluated");

        if fire {
            self.send_notification().await;
        }

        let record = TickRecord {
            timestamp: now,
            signal,
        };
        if let Err(e) = self
            .bounded("tick persistence", self.store.record_tick(record))
            .await
        {
            warn!(error = %e, "failed to persist tick aggregate");
        }

        TickReport {
            tick_id,
            timestamp: now,
            signal,
            transition,
            persisted,
            threshold,
            asleep,
            notified: fire,
        }
    }

    async fn close_episode(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CloseOutcome, DetectorError> {
        let episode = self
            .bounded(
                "episode finalization",
                finalize_episode(self.store.as_ref(), start, end),
            )
            .await?;

        let Some(episode) = episode else {
            warn!(
                episode_start = %start,
                episode_end = %end,
                "no heart-rate ticks recorded for episode, dropping it"
            );
            return Ok(CloseOutcome {
                episode: None,
                threshold: None,
            });
        };

        let samples = self.lock_state().calibrator.samples();
        let threshold = match self
            .bounded(
                "threshold recompute",
                ThresholdCalibrator::recompute(self.store.as_ref(), samples),
            )
            .await
        {
            Ok(threshold) => Some(threshold),
            Err(e) => {
                warn!(error = %e, "threshold recompute failed, keeping previous value");
                None
            }
        };

        Ok(CloseOutcome {
            episode: Some(episode),
            threshold,
        })
    }

    async fn send_notification(&self) {
        let timeout = self.config.webhook_timeout();
        let outcome = tokio::time::timeout(timeout, self.notifier.notify_sleep())
            .await
            .map_err(|_| DetectorError::Timeout("sleep notification"))
            .and_then(|r| r);
        match outcome {
            Ok(()) => info!("sleep onset notified"),
            Err(e) => warn!(error = %e, "sleep notification failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the tick loop. The first tick runs immediately.
    pub fn start(self: &Arc<Self>) -> DetectorHandle {
        let detector = Arc::clone(self);
        let interval = self.config.tick_interval();
        let tick_loop = spawn_tick_loop(interval, move || {
            let detector = Arc::clone(&detector);
            async move {
                detector.tick().await;
            }
        });
        info!(interval_secs = interval.as_secs(), "tick loop started");

        DetectorHandle {
            detector: Arc::clone(self),
            tick_loop,
        }
    }
}

/// Running detector; dropping it leaves the loop running until [`DetectorHandle::stop`]
pub struct DetectorHandle {
    detector: Arc<SleepDetector>,
    tick_loop: JoinHandle<()>,
}

impl DetectorHandle {
    /// Stop the tick loop and drop any pending activity timer
    pub fn stop(self) {
        self.tick_loop.abort();
        self.detector.lock_state().activity.cancel();
        info!("tick loop stopped");
    }

    pub fn interval(&self) -> Duration {
        self.detector.config.tick_interval()
    }
}
