//! Synchronized capture for a two-camera calibration session.
//!
//! [`CaptureScheduler`] polls both [`DeviceAdapter`](xcal_device::DeviceAdapter)s,
//! pairs their frames, runs the pattern detector on each pair and, once the
//! operator confirms through the [`control_channel`], offers the pair to the
//! [`CorrespondenceAccumulator`]. The accumulator's
//! [`snapshot`](CorrespondenceAccumulator::snapshot) is the solver input.

mod accumulator;
mod control;
mod scheduler;

pub use accumulator::{AccumulatorParams, CorrespondenceAccumulator, OfferOutcome, RejectReason};
pub use control::{
    control_channel, CancellationToken, ControlCommand, ControlReceiver, ControlSender,
};
pub use scheduler::{
    CaptureError, CaptureScheduler, CycleReport, FinishReason, SchedulerParams, SchedulerState,
};
