//! Operator commands and cancellation for a running capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Accept the next detected pair.
    Confirm,
    /// Abort the session.
    Stop,
}

/// Cloneable stop flag shared between the capture loop and its host.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Host side of the control channel.
#[derive(Clone, Debug)]
pub struct ControlSender {
    tx: Sender<ControlCommand>,
    token: CancellationToken,
}

impl ControlSender {
    /// Queue `command`. Returns `false` when the loop is gone or a command is
    /// already pending; `Stop` still takes effect through the token.
    pub fn send(&self, command: ControlCommand) -> bool {
        if command == ControlCommand::Stop {
            self.token.cancel();
        }
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn confirm(&self) -> bool {
        self.send(ControlCommand::Confirm)
    }

    pub fn stop(&self) -> bool {
        self.send(ControlCommand::Stop)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Capture-loop side of the control channel.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: Receiver<ControlCommand>,
    token: CancellationToken,
}

impl ControlReceiver {
    /// Pending command, if any; never blocks. Once cancelled this always
    /// reports `Stop`.
    pub fn poll(&self) -> Option<ControlCommand> {
        if self.token.is_cancelled() {
            return Some(ControlCommand::Stop);
        }
        match self.rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Single-slot control channel sharing one [`CancellationToken`].
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = bounded(1);
    let token = CancellationToken::new();
    (
        ControlSender {
            tx,
            token: token.clone(),
        },
        ControlReceiver { rx, token },
    )
}
