//! Event camera: frames arrive on a background stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, trace, warn};
use xcal_core::{CameraId, DeviceIntrinsics, FrameSample, ImageSize, Timestamp};

use crate::adapter::{AcquireError, DeviceAdapter, DeviceInfo, OpenError};
use crate::config::DeviceConfig;
use crate::source::{FrameSource, RawFrame};

enum StreamMessage {
    Frame { raw: RawFrame, relative_ns: i64 },
    End,
    Failed(String),
}

/// Adapter for a camera whose SDK pushes frames from its own thread (the
/// event camera of the rig).
///
/// A reader thread pulls from the source into a bounded queue; `acquire`
/// never blocks and reports [`AcquireError::NoFrameAvailable`] while the queue
/// is empty. Timestamps are nanoseconds since the stream started. When
/// pacing is on the reader drops frames instead of waiting on a full queue,
/// as a live device would.
pub struct EventCamera {
    info: DeviceInfo,
    running: Arc<AtomicBool>,
    receiver: Option<Receiver<StreamMessage>>,
    reader: Option<JoinHandle<()>>,
    ended: bool,
    sequence: u64,
}

impl EventCamera {
    pub fn open<S>(config: &DeviceConfig, source: S) -> Result<Self, OpenError>
    where
        S: FrameSource + Send + 'static,
    {
        let info = config.prepare(&source)?;
        let (tx, rx) = bounded(config.queue_depth);
        let running = Arc::new(AtomicBool::new(true));

        let reader_running = Arc::clone(&running);
        let interval = info.frame_interval;
        let pace = config.pace;
        let id = info.id.clone();
        let reader = thread::Builder::new()
            .name(format!("xcal-reader-{}", info.id))
            .spawn(move || read_stream(source, tx, reader_running, interval, pace, id))
            .map_err(|e| OpenError::Unreachable {
                device: info.id.clone(),
                reason: format!("failed to start reader thread: {e}"),
            })?;

        debug!(
            "event camera `{}`: {} queue depth {}",
            info.id, info.resolution, config.queue_depth
        );
        Ok(Self {
            info,
            running,
            receiver: Some(rx),
            reader: Some(reader),
            ended: false,
            sequence: 0,
        })
    }
}

fn read_stream<S: FrameSource>(
    mut source: S,
    tx: Sender<StreamMessage>,
    running: Arc<AtomicBool>,
    interval: Duration,
    pace: bool,
    id: CameraId,
) {
    let started = Instant::now();
    let mut index: u64 = 0;
    while running.load(Ordering::Acquire) {
        if pace {
            let due = started + interval.mul_f64(index as f64);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        let message = match source.next_frame() {
            Ok(Some(raw)) => {
                let relative_ns = raw.device_time_ns.unwrap_or_else(|| {
                    if pace {
                        started.elapsed().as_nanos() as i64
                    } else {
                        (index as i64) * interval.as_nanos() as i64
                    }
                });
                StreamMessage::Frame { raw, relative_ns }
            }
            Ok(None) => StreamMessage::End,
            Err(e) => StreamMessage::Failed(e.to_string()),
        };
        let last = !matches!(message, StreamMessage::Frame { .. });
        index += 1;

        if pace && !last {
            match tx.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => trace!("`{id}` queue full, dropped frame {index}"),
                Err(TrySendError::Disconnected(_)) => return,
            }
        } else if tx.send(message).is_err() {
            return;
        }
        if last {
            return;
        }
    }
}

impl DeviceAdapter for EventCamera {
    fn id(&self) -> &CameraId {
        &self.info.id
    }

    fn intrinsics(&self) -> &DeviceIntrinsics {
        &self.info.intrinsics
    }

    fn resolution(&self) -> ImageSize {
        self.info.resolution
    }

    fn nominal_frame_interval(&self) -> Duration {
        self.info.frame_interval
    }

    fn acquire(&mut self) -> Result<FrameSample, AcquireError> {
        let receiver = self.receiver.as_ref().ok_or(AcquireError::Closed)?;
        if self.ended {
            return Err(AcquireError::EndOfStream);
        }
        match receiver.try_recv() {
            Ok(StreamMessage::Frame { raw, relative_ns }) => {
                let sample = FrameSample {
                    camera: self.info.id.clone(),
                    image: raw.image,
                    timestamp: Timestamp::relative(relative_ns),
                    sequence: self.sequence,
                };
                self.sequence += 1;
                Ok(sample)
            }
            Ok(StreamMessage::End) | Err(TryRecvError::Disconnected) => {
                self.ended = true;
                Err(AcquireError::EndOfStream)
            }
            Ok(StreamMessage::Failed(reason)) => {
                self.ended = true;
                warn!("`{}` stream failed: {reason}", self.info.id);
                Err(AcquireError::Device(reason))
            }
            Err(TryRecvError::Empty) => Err(AcquireError::NoFrameAvailable),
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        // Dropping the receiver unblocks a reader waiting on a full queue.
        let was_open = self.receiver.take().is_some();
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("reader thread of `{}` panicked", self.info.id);
            }
        }
        if was_open {
            debug!("closed event camera `{}`", self.info.id);
        }
    }

    fn is_open(&self) -> bool {
        self.receiver.is_some()
    }
}

impl Drop for EventCamera {
    fn drop(&mut self) {
        self.close();
    }
}
