use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nalgebra::Point2;
use xcal_capture::{
    control_channel, AccumulatorParams, CaptureError, CaptureScheduler, ControlSender,
    CorrespondenceAccumulator, FinishReason, OfferOutcome, RejectReason, SchedulerParams,
    SchedulerState,
};
use xcal_core::{
    CameraId, CameraMatrix, DetectionResult, DeviceIntrinsics, FrameSample, GrayImage,
    GrayImageView, ImageSize, TargetGeometry, Timestamp,
};
use xcal_detect::PatternDetector;
use xcal_device::{AcquireError, DeviceAdapter};

/// Adapter replaying a script of frame brightness values and errors.
struct ScriptedCamera {
    id: CameraId,
    intrinsics: DeviceIntrinsics,
    script: VecDeque<Result<u8, AcquireError>>,
    relative: bool,
    sequence: u64,
    closed: Arc<AtomicBool>,
}

impl ScriptedCamera {
    fn new(id: &str, script: Vec<Result<u8, AcquireError>>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let cam = Self {
            id: CameraId::new(id),
            intrinsics: DeviceIntrinsics::new(
                CameraMatrix {
                    fx: 100.0,
                    fy: 100.0,
                    cx: 2.0,
                    cy: 2.0,
                },
                vec![],
            )
            .unwrap(),
            script: script.into(),
            relative: false,
            sequence: 0,
            closed: Arc::clone(&closed),
        };
        (cam, closed)
    }

    fn relative(mut self) -> Self {
        self.relative = true;
        self
    }
}

impl DeviceAdapter for ScriptedCamera {
    fn id(&self) -> &CameraId {
        &self.id
    }

    fn intrinsics(&self) -> &DeviceIntrinsics {
        &self.intrinsics
    }

    fn resolution(&self) -> ImageSize {
        ImageSize::new(4, 4)
    }

    fn nominal_frame_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn acquire(&mut self) -> Result<FrameSample, AcquireError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AcquireError::Closed);
        }
        let value = self.script.pop_front().unwrap_or(Err(AcquireError::EndOfStream))?;
        let nanos = 1_000_000 * self.sequence as i64;
        let sample = FrameSample {
            camera: self.id.clone(),
            image: GrayImage::filled(4, 4, value),
            timestamp: if self.relative {
                Timestamp::relative(nanos)
            } else {
                Timestamp::absolute(1_700_000_000_000_000_000 + nanos)
            },
            sequence: self.sequence,
        };
        self.sequence += 1;
        Ok(sample)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// "Finds" the target in bright frames.
struct BrightnessDetector;

impl PatternDetector for BrightnessDetector {
    fn detect(&self, image: &GrayImageView<'_>, geometry: &TargetGeometry) -> DetectionResult {
        if image.get(0, 0) < 128 {
            return DetectionResult::not_found();
        }
        DetectionResult::found(
            (0..geometry.point_count())
                .map(|i| Point2::new(i as f64, image.get(0, 0) as f64))
                .collect(),
        )
    }
}

fn bright(n: usize) -> Vec<Result<u8, AcquireError>> {
    (0..n).map(|i| Ok(200 + i as u8)).collect()
}

type Scheduler = CaptureScheduler<ScriptedCamera, ScriptedCamera, BrightnessDetector>;

fn scheduler(
    a: ScriptedCamera,
    b: ScriptedCamera,
    target_views: usize,
    params: SchedulerParams,
) -> (Scheduler, ControlSender) {
    let (tx, rx) = control_channel();
    let sched = CaptureScheduler::new(
        a,
        b,
        BrightnessDetector,
        TargetGeometry::new(4, 5, 50.0).unwrap(),
        CorrespondenceAccumulator::new(AccumulatorParams { target_views }),
        rx,
        params,
    );
    (sched, tx)
}

fn fast() -> SchedulerParams {
    SchedulerParams {
        poll_interval_ms: 1,
        ..SchedulerParams::default()
    }
}

/// Confirm before every cycle until the scheduler finishes.
fn confirm_all(sched: &mut Scheduler, tx: &ControlSender) -> FinishReason {
    for _ in 0..1000 {
        tx.confirm();
        let report = sched.step().unwrap();
        if let SchedulerState::Finished(reason) = report.state {
            return reason;
        }
    }
    panic!("scheduler never finished");
}

#[test]
fn finishes_exactly_at_the_target_view_count() {
    let (a, closed_a) = ScriptedCamera::new("event", bright(30));
    let (b, closed_b) = ScriptedCamera::new("depth", bright(30));
    let (mut sched, tx) = scheduler(a, b, 20, fast());

    let mut seen = Vec::new();
    loop {
        tx.confirm();
        let report = sched.step().unwrap();
        if let Some(OfferOutcome::Accepted { count }) = report.offer {
            seen.push(count);
            if count == 19 {
                assert!(!sched.accumulator().is_complete());
            }
        }
        if report.state.is_finished() {
            assert_eq!(report.state, SchedulerState::Finished(FinishReason::Complete));
            break;
        }
    }
    assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    assert!(sched.accumulator().is_complete());
    assert!(closed_a.load(Ordering::SeqCst) && closed_b.load(Ordering::SeqCst));

    let set = sched.into_accumulator().snapshot();
    assert_eq!(set.view_count(), 20);
    assert!(set.image_points_a.iter().all(|v| v.len() == 20));
    assert!(set.image_points_b.iter().all(|v| v.len() == 20));
}

#[test]
fn pairs_without_confirmation_are_only_reported() {
    let (a, closed_a) = ScriptedCamera::new("event", bright(5));
    let (b, closed_b) = ScriptedCamera::new("depth", bright(5));
    let (mut sched, _tx) = scheduler(a, b, 20, fast());

    let first = sched.step().unwrap();
    assert_eq!(first.state, SchedulerState::PairReady);
    assert_eq!((first.found_a, first.found_b), (Some(true), Some(true)));
    assert_eq!(first.offer, None);

    let reason = sched.run().unwrap();
    assert_eq!(reason, FinishReason::EndOfStream(CameraId::new("event")));
    assert_eq!(sched.accumulator().count(), 0);
    assert!(closed_a.load(Ordering::SeqCst) && closed_b.load(Ordering::SeqCst));
}

#[test]
fn confirmed_miss_is_rejected_and_count_is_unchanged() {
    let (a, _) = ScriptedCamera::new("event", vec![Ok(10), Ok(210)]);
    let (b, _) = ScriptedCamera::new("depth", vec![Ok(220), Ok(230)]);
    let (mut sched, tx) = scheduler(a, b, 20, fast());

    tx.confirm();
    let report = sched.step().unwrap();
    assert_eq!(report.found_a, Some(false));
    assert_eq!(
        report.offer,
        Some(OfferOutcome::Rejected(RejectReason::NotFoundInA))
    );
    assert_eq!(sched.accumulator().count(), 0);

    tx.confirm();
    let report = sched.step().unwrap();
    assert_eq!(report.offer, Some(OfferOutcome::Accepted { count: 1 }));
}

#[test]
fn stop_closes_both_cameras() {
    let (a, closed_a) = ScriptedCamera::new("event", bright(100));
    let (b, closed_b) = ScriptedCamera::new("depth", bright(100));
    let (mut sched, tx) = scheduler(a, b, 20, fast());

    tx.confirm();
    sched.step().unwrap();
    tx.stop();
    assert_eq!(sched.run().unwrap(), FinishReason::Stopped);
    assert_eq!(sched.accumulator().count(), 1);
    assert!(closed_a.load(Ordering::SeqCst) && closed_b.load(Ordering::SeqCst));
    assert!(!sched.camera_a().is_open());
}

#[test]
fn cancellation_token_stops_the_loop() {
    let (a, _) = ScriptedCamera::new("event", bright(100));
    let (b, closed_b) = ScriptedCamera::new("depth", bright(100));
    let (mut sched, tx) = scheduler(a, b, 20, fast());
    tx.token().cancel();
    assert_eq!(sched.run().unwrap(), FinishReason::Stopped);
    assert!(closed_b.load(Ordering::SeqCst));
}

#[test]
fn device_failure_is_fatal_and_closes_both_cameras() {
    let (a, closed_a) = ScriptedCamera::new("event", bright(3));
    let (b, closed_b) = ScriptedCamera::new(
        "depth",
        vec![Ok(200), Err(AcquireError::Device("usb reset".into()))],
    );
    let (mut sched, tx) = scheduler(a, b, 20, fast());

    tx.confirm();
    let err = confirm_all_err(&mut sched, &tx);
    assert_eq!(
        err,
        CaptureError::Device {
            camera: CameraId::new("depth"),
            source: AcquireError::Device("usb reset".into()),
        }
    );
    assert_eq!(sched.accumulator().count(), 1);
    assert!(closed_a.load(Ordering::SeqCst) && closed_b.load(Ordering::SeqCst));
}

fn confirm_all_err(sched: &mut Scheduler, tx: &ControlSender) -> CaptureError {
    for _ in 0..1000 {
        tx.confirm();
        if let Err(e) = sched.step() {
            return e;
        }
    }
    panic!("scheduler never failed");
}

#[test]
fn held_frame_waits_for_its_partner() {
    let (a, _) = ScriptedCamera::new(
        "event",
        vec![Err(AcquireError::NoFrameAvailable), Ok(201)],
    );
    let (b, _) = ScriptedCamera::new("depth", vec![Ok(250), Ok(251)]);
    let params = SchedulerParams {
        pairing_window_ms: Some(1_000),
        ..fast()
    };
    let (mut sched, tx) = scheduler(a, b, 20, params);

    tx.confirm();
    assert_eq!(sched.step().unwrap().state, SchedulerState::Polling);
    let report = sched.step().unwrap();
    assert_eq!(report.state, SchedulerState::PairReady);
    assert!(report.offer.unwrap().is_accepted());
    let set = sched.accumulator().snapshot();
    // The depth frame from the first cycle was kept, not replaced.
    assert_eq!(set.image_points_b[0][0].y, 250.0);
}

#[test]
fn unpaired_frame_expires_after_the_window() {
    let (a, _) = ScriptedCamera::new(
        "event",
        vec![
            Err(AcquireError::NoFrameAvailable),
            Err(AcquireError::NoFrameAvailable),
        ],
    );
    let (b, _) = ScriptedCamera::new("depth", bright(5));
    let params = SchedulerParams {
        poll_interval_ms: 5,
        pairing_window_ms: Some(1),
        max_skew_ms: 20,
    };
    let (mut sched, _tx) = scheduler(a, b, 20, params);
    assert_eq!(sched.pairing_window(), Duration::from_millis(1));

    assert_eq!(sched.step().unwrap().state, SchedulerState::Polling);
    assert_eq!(sched.step().unwrap().state, SchedulerState::PartialTimeout);
}

#[test]
fn default_pairing_window_is_the_slower_frame_interval() {
    let (a, _) = ScriptedCamera::new("event", vec![]);
    let (b, _) = ScriptedCamera::new("depth", vec![]);
    let (sched, _tx) = scheduler(a, b, 20, SchedulerParams::default());
    assert_eq!(sched.pairing_window(), Duration::from_millis(10));
}

#[test]
fn skew_is_measured_across_clock_domains() {
    let (a, _) = ScriptedCamera::new("event", bright(3));
    let (b, _) = ScriptedCamera::new("depth", bright(3));
    let (mut sched, _tx) = scheduler(a.relative(), b, 20, fast());

    assert_eq!(sched.step().unwrap().skew, Some(Duration::ZERO));
    assert!(sched.reconciler().offset().is_some());
    assert_eq!(sched.step().unwrap().skew, Some(Duration::ZERO));
}

#[test]
fn dropping_the_scheduler_closes_cameras() {
    let (a, closed_a) = ScriptedCamera::new("event", bright(3));
    let (b, closed_b) = ScriptedCamera::new("depth", bright(3));
    let (sched, _tx) = scheduler(a, b, 20, fast());
    drop(sched);
    assert!(closed_a.load(Ordering::SeqCst) && closed_b.load(Ordering::SeqCst));
}

#[test]
fn params_read_from_json_with_defaults() {
    let params: SchedulerParams = serde_json::from_str(r#"{"max_skew_ms": 5}"#).unwrap();
    assert_eq!(params.max_skew_ms, 5);
    assert_eq!(params.pairing_window_ms, None);
    assert_eq!(params.poll_interval(), Duration::from_millis(2));
}

#[test]
fn confirm_helper_finishes_on_end_of_stream() {
    let (a, _) = ScriptedCamera::new("event", bright(2));
    let (b, _) = ScriptedCamera::new("depth", bright(4));
    let (mut sched, tx) = scheduler(a, b, 20, fast());
    assert_eq!(
        confirm_all(&mut sched, &tx),
        FinishReason::EndOfStream(CameraId::new("event"))
    );
    assert_eq!(sched.accumulator().count(), 2);
}
