//! Paired acquisition from two cameras with operator-confirmed views.

use std::fmt;
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use xcal_core::{CameraId, FrameSample, ObservationPair, TargetGeometry, TimestampReconciler};
use xcal_detect::PatternDetector;
use xcal_device::{AcquireError, DeviceAdapter};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::accumulator::{CorrespondenceAccumulator, OfferOutcome};
use crate::control::{ControlCommand, ControlReceiver};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerParams {
    /// Sleep between cycles that produced no pair; capped at 100 ms.
    pub poll_interval_ms: u64,
    /// How long a held frame waits for its partner. Defaults to the slower
    /// camera's nominal frame interval.
    pub pairing_window_ms: Option<u64>,
    /// Pair skew above which a warning is logged.
    pub max_skew_ms: u64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            pairing_window_ms: None,
            max_skew_ms: 20,
        }
    }
}

impl SchedulerParams {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).min(MAX_POLL_INTERVAL)
    }

    pub fn max_skew(&self) -> Duration {
        Duration::from_millis(self.max_skew_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The accumulator reached its target view count.
    Complete,
    /// The operator or host cancelled.
    Stopped,
    /// A camera ran out of frames.
    EndOfStream(CameraId),
    /// A camera reported a fatal error.
    DeviceFailed(CameraId),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Complete => f.write_str("enough views collected"),
            FinishReason::Stopped => f.write_str("stopped by operator"),
            FinishReason::EndOfStream(id) => write!(f, "`{id}` ran out of frames"),
            FinishReason::DeviceFailed(id) => write!(f, "`{id}` failed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    PairReady,
    /// A held frame expired before its partner arrived.
    PartialTimeout,
    Finished(FinishReason),
}

impl SchedulerState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SchedulerState::Finished(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("camera `{camera}` failed: {source}")]
    Device {
        camera: CameraId,
        #[source]
        source: AcquireError,
    },
}

/// What one cycle did, for hosts that render status.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub state: SchedulerState,
    pub found_a: Option<bool>,
    pub found_b: Option<bool>,
    pub skew: Option<Duration>,
    pub offer: Option<OfferOutcome>,
    pub views: usize,
}

impl CycleReport {
    fn new(state: SchedulerState, views: usize) -> Self {
        Self {
            state,
            found_a: None,
            found_b: None,
            skew: None,
            offer: None,
            views,
        }
    }
}

struct Held {
    sample: FrameSample,
    since: Instant,
}

/// Drives both adapters, pairs their frames and offers confirmed pairs to
/// the accumulator.
///
/// A held frame is kept until its partner arrives or the pairing window
/// expires; its adapter is not polled meanwhile, so a pair is built from the
/// first frame each camera delivered inside the window. Both adapters are
/// closed when the scheduler finishes for any reason, and again on drop.
pub struct CaptureScheduler<A: DeviceAdapter, B: DeviceAdapter, D: PatternDetector> {
    camera_a: A,
    camera_b: B,
    detector: D,
    geometry: TargetGeometry,
    control: ControlReceiver,
    accumulator: CorrespondenceAccumulator,
    reconciler: TimestampReconciler,
    params: SchedulerParams,
    pairing_window: Duration,
    state: SchedulerState,
    slot_a: Option<Held>,
    slot_b: Option<Held>,
    confirm_pending: bool,
}

impl<A: DeviceAdapter, B: DeviceAdapter, D: PatternDetector> CaptureScheduler<A, B, D> {
    pub fn new(
        camera_a: A,
        camera_b: B,
        detector: D,
        geometry: TargetGeometry,
        accumulator: CorrespondenceAccumulator,
        control: ControlReceiver,
        params: SchedulerParams,
    ) -> Self {
        let pairing_window = params.pairing_window_ms.map_or_else(
            || {
                camera_a
                    .nominal_frame_interval()
                    .max(camera_b.nominal_frame_interval())
            },
            Duration::from_millis,
        );
        Self {
            camera_a,
            camera_b,
            detector,
            geometry,
            control,
            accumulator,
            reconciler: TimestampReconciler::new(),
            params,
            pairing_window,
            state: SchedulerState::Idle,
            slot_a: None,
            slot_b: None,
            confirm_pending: false,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn accumulator(&self) -> &CorrespondenceAccumulator {
        &self.accumulator
    }

    pub fn reconciler(&self) -> &TimestampReconciler {
        &self.reconciler
    }

    pub fn pairing_window(&self) -> Duration {
        self.pairing_window
    }

    pub fn camera_a(&self) -> &A {
        &self.camera_a
    }

    pub fn camera_b(&self) -> &B {
        &self.camera_b
    }

    /// Hand the collected views to the caller, closing both cameras.
    pub fn into_accumulator(mut self) -> CorrespondenceAccumulator {
        self.close_devices();
        mem::take(&mut self.accumulator)
    }

    /// Loop over [`step`](Self::step) until the accumulator is complete, the
    /// operator stops, or a stream ends.
    pub fn run(&mut self) -> Result<FinishReason, CaptureError> {
        info!(
            "capturing {} views from `{}` and `{}`",
            self.accumulator.remaining(),
            self.camera_a.id(),
            self.camera_b.id()
        );
        loop {
            let report = self.step()?;
            if let SchedulerState::Finished(reason) = report.state {
                return Ok(reason);
            }
        }
    }

    /// One cycle of the capture loop.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn step(&mut self) -> Result<CycleReport, CaptureError> {
        if self.state.is_finished() {
            return Ok(CycleReport::new(self.state.clone(), self.accumulator.count()));
        }

        while let Some(cmd) = self.control.poll() {
            match cmd {
                ControlCommand::Confirm => self.confirm_pending = true,
                ControlCommand::Stop => return Ok(self.finish(FinishReason::Stopped)),
            }
        }
        if self.accumulator.is_complete() {
            return Ok(self.finish(FinishReason::Complete));
        }
        self.state = SchedulerState::Polling;

        if self.slot_a.is_none() {
            match self.camera_a.acquire() {
                Ok(sample) => self.slot_a = Some(held(sample)),
                Err(AcquireError::NoFrameAvailable) => {}
                Err(AcquireError::EndOfStream) => {
                    let id = self.camera_a.id().clone();
                    return Ok(self.finish(FinishReason::EndOfStream(id)));
                }
                Err(source) => {
                    let camera = self.camera_a.id().clone();
                    return Err(self.fail(camera, source));
                }
            }
        }
        if self.slot_b.is_none() {
            match self.camera_b.acquire() {
                Ok(sample) => self.slot_b = Some(held(sample)),
                Err(AcquireError::NoFrameAvailable) => {}
                Err(AcquireError::EndOfStream) => {
                    let id = self.camera_b.id().clone();
                    return Ok(self.finish(FinishReason::EndOfStream(id)));
                }
                Err(source) => {
                    let camera = self.camera_b.id().clone();
                    return Err(self.fail(camera, source));
                }
            }
        }

        if self.slot_a.is_some() && self.slot_b.is_some() {
            if let (Some(a), Some(b)) = (self.slot_a.take(), self.slot_b.take()) {
                return Ok(self.process_pair(a.sample, b.sample));
            }
        }

        let window = self.pairing_window;
        let expired = |slot: &Option<Held>| slot.as_ref().is_some_and(|h| h.since.elapsed() > window);
        if expired(&self.slot_a) || expired(&self.slot_b) {
            for (slot, name) in [(&mut self.slot_a, "A"), (&mut self.slot_b, "B")] {
                if expired(&*slot) {
                    if let Some(h) = slot.take() {
                        trace!("camera {name}: frame {} expired unpaired", h.sample.sequence);
                    }
                }
            }
            self.state = SchedulerState::PartialTimeout;
            return Ok(CycleReport::new(self.state.clone(), self.accumulator.count()));
        }

        thread::sleep(self.params.poll_interval());
        Ok(CycleReport::new(self.state.clone(), self.accumulator.count()))
    }

    fn process_pair(&mut self, a: FrameSample, b: FrameSample) -> CycleReport {
        self.state = SchedulerState::PairReady;
        let skew = self.reconciler.skew(a.timestamp, b.timestamp);
        if let Some(skew) = skew {
            if skew > self.params.max_skew() {
                warn!(
                    "pair {}/{} skew {:?} exceeds {:?}",
                    a.sequence,
                    b.sequence,
                    skew,
                    self.params.max_skew()
                );
            }
        }

        let detection_a = self.detector.detect(&a.image.view(), &self.geometry);
        let detection_b = self.detector.detect(&b.image.view(), &self.geometry);
        let mut report = CycleReport::new(self.state.clone(), self.accumulator.count());
        report.found_a = Some(detection_a.found);
        report.found_b = Some(detection_b.found);
        report.skew = skew;
        debug!(
            "pair {}/{}: found A={} B={} skew {:?}",
            a.sequence, b.sequence, detection_a.found, detection_b.found, skew
        );

        if self.confirm_pending {
            self.confirm_pending = false;
            let outcome = self.accumulator.offer(ObservationPair::new(
                self.geometry.object_points(),
                detection_a,
                detection_b,
            ));
            match outcome {
                OfferOutcome::Accepted { count } => info!(
                    "view {count}/{} accepted",
                    self.accumulator.target_views()
                ),
                OfferOutcome::Rejected(reason) => info!("view rejected: {reason}"),
            }
            report.offer = Some(outcome);
            report.views = self.accumulator.count();
        }
        report
    }

    fn finish(&mut self, reason: FinishReason) -> CycleReport {
        info!(
            "capture finished ({reason}) with {} views",
            self.accumulator.count()
        );
        self.close_devices();
        self.state = SchedulerState::Finished(reason);
        CycleReport::new(self.state.clone(), self.accumulator.count())
    }

    fn fail(&mut self, camera: CameraId, source: AcquireError) -> CaptureError {
        warn!("camera `{camera}` failed: {source}");
        self.close_devices();
        self.state = SchedulerState::Finished(FinishReason::DeviceFailed(camera.clone()));
        CaptureError::Device { camera, source }
    }

    fn close_devices(&mut self) {
        self.slot_a = None;
        self.slot_b = None;
        self.camera_a.close();
        self.camera_b.close();
    }
}

impl<A: DeviceAdapter, B: DeviceAdapter, D: PatternDetector> Drop for CaptureScheduler<A, B, D> {
    fn drop(&mut self) {
        self.close_devices();
    }
}

fn held(sample: FrameSample) -> Held {
    Held {
        sample,
        since: Instant::now(),
    }
}
