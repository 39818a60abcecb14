//! Remote control protocol.
//!
//! The controller talks to the device over three endpoints:
//!
//! - **command**: a single-byte write, decoded into a [`Command`] and executed
//!   synchronously against the [`RecordingCoordinator`]
//! - **read**: returns up to `read_chunk` bytes from the data stream's read cursor
//! - **notification**: device-initiated messages; `GetMeta` answers here, never as
//!   a direct reply
//!
//! The transport itself lives outside this module. [`ControlHandler`] is what a
//! transport calls into; [`server`] is a TCP stand-in for the wireless link.

pub mod server;

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::coordinator::RecordingCoordinator;
use crate::data::RecordMeta;
use crate::error::{AppResult, RecorderError};

/// Commands accepted on the command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// End the recording session
    Stop = 0,
    /// Begin a recording session
    Start = 1,
    /// Open the persistent log
    OpenStorage = 2,
    /// Close the persistent log
    CloseStorage = 3,
    /// Request the record metadata as a notification
    GetMeta = 4,
}

impl Command {
    /// Wire code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = RecorderError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Command::Stop),
            1 => Ok(Command::Start),
            2 => Ok(Command::OpenStorage),
            3 => Ok(Command::CloseStorage),
            4 => Ok(Command::GetMeta),
            other => Err(RecorderError::ProtocolViolation(format!(
                "unknown command code {other:#04x}"
            ))),
        }
    }
}

/// Device-initiated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Answer to `GetMeta`
    RecordMeta(RecordMeta),
}

impl Notification {
    /// Notification payload as sent to the controller.
    pub fn encode(&self) -> Bytes {
        match self {
            Notification::RecordMeta(meta) => meta.encode(),
        }
    }
}

/// Transport-facing side of the control protocol.
pub struct ControlHandler {
    coordinator: Arc<RecordingCoordinator>,
    notifications: mpsc::Sender<Notification>,
    connected: watch::Sender<bool>,
    read_chunk: usize,
}

impl ControlHandler {
    /// Handler dispatching to `coordinator`.
    ///
    /// Returns the receiving end of the notification channel; the transport drains
    /// it and forwards each notification to the controller.
    pub fn new(
        coordinator: Arc<RecordingCoordinator>,
        read_chunk: usize,
        notification_capacity: usize,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (notifications, rx) = mpsc::channel(notification_capacity.max(1));
        let (connected, _) = watch::channel(false);
        let handler = Self {
            coordinator,
            notifications,
            connected,
            read_chunk,
        };
        (handler, rx)
    }

    /// Execute one command write.
    ///
    /// The payload must be exactly one known command byte; anything else is a
    /// `ProtocolViolation` and the transport should drop the link. Other errors
    /// come from the coordinator and leave the link usable.
    pub async fn handle_command(&self, payload: &[u8]) -> AppResult<()> {
        let [code] = payload else {
            return Err(RecorderError::ProtocolViolation(format!(
                "command write of {} bytes",
                payload.len()
            )));
        };
        let command = Command::try_from(*code)?;
        debug!(?command, "Command received");

        match command {
            Command::Stop => self.coordinator.stop().await.map(|_| ()),
            Command::Start => self.coordinator.start().await,
            Command::OpenStorage => self.coordinator.open_storage().await,
            Command::CloseStorage => self.coordinator.close_storage().await,
            Command::GetMeta => {
                let meta = self.coordinator.get_meta().await?;
                self.notify(Notification::RecordMeta(meta));
                Ok(())
            }
        }
    }

    /// Serve a read request of at most `max_len` bytes, capped at the read chunk.
    pub fn handle_read(&self, max_len: usize) -> AppResult<Bytes> {
        self.coordinator.read(max_len.min(self.read_chunk))
    }

    /// The link came up.
    pub fn on_connected(&self) {
        self.connected.send_replace(true);
        info!("Controller connected");
    }

    /// The link went down. Any active session is stopped.
    pub async fn on_disconnected(&self) -> AppResult<()> {
        self.connected.send_replace(false);
        info!("Controller disconnected");
        self.coordinator.stop().await.map(|_| ())
    }

    /// Whether a controller is connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Follow connection changes.
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Largest payload a read request returns.
    pub fn read_chunk(&self) -> usize {
        self.read_chunk
    }

    /// Coordinator this handler dispatches to.
    pub fn coordinator(&self) -> &Arc<RecordingCoordinator> {
        &self.coordinator
    }

    fn notify(&self, notification: Notification) {
        match self.notifications.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(?dropped, "Notification backlog full, dropping");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("No notification subscriber");
            }
        }
    }
}
