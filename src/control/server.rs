//! TCP stand-in for the wireless control link.
//!
//! One controller at a time. Frames are a one-byte tag followed by a fixed or
//! length-prefixed body (lengths are little-endian u16):
//!
//! | direction | tag | body | meaning |
//! |---|---|---|---|
//! | controller → device | `W` | 1 byte command | command write |
//! | controller → device | `R` | u16 max length | read request |
//! | device → controller | `D` | u16 n, n bytes | read response |
//! | device → controller | `N` | 8-byte record meta | notification |
//!
//! Closing the connection is a link disconnect and forces a stop. A protocol
//! violation drops the link and ends [`ControlServer::run`] with the error.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{Command, ControlHandler, Notification};
use crate::data::{RecordMeta, META_SIZE};
use crate::error::{AppResult, RecorderError};

/// Command write tag.
pub const TAG_WRITE: u8 = b'W';
/// Read request tag.
pub const TAG_READ: u8 = b'R';
/// Read response tag.
pub const TAG_DATA: u8 = b'D';
/// Notification tag.
pub const TAG_NOTIFY: u8 = b'N';

enum LinkEnd {
    Closed,
    Shutdown,
}

/// Accepts controller connections and bridges them to a [`ControlHandler`].
pub struct ControlServer {
    listener: TcpListener,
    handler: Arc<ControlHandler>,
    notifications: mpsc::Receiver<Notification>,
}

impl ControlServer {
    /// Listen on `addr`.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        handler: Arc<ControlHandler>,
        notifications: mpsc::Receiver<Notification>,
    ) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler,
            notifications,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve controllers one after another until `shutdown` completes or a
    /// controller violates the protocol.
    pub async fn run<F>(mut self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, "Control link listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Control link shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };

            // Stale answers belong to the previous controller.
            while self.notifications.try_recv().is_ok() {}

            info!(%peer, "Link up");
            self.handler.on_connected();
            let outcome = serve_link(
                stream,
                &self.handler,
                &mut self.notifications,
                shutdown.as_mut(),
            )
            .await;
            if let Err(e) = self.handler.on_disconnected().await {
                warn!(error = %e, "Stop on disconnect incomplete");
            }
            info!(%peer, "Link down");

            match outcome {
                Ok(LinkEnd::Closed) => {}
                Ok(LinkEnd::Shutdown) => return Ok(()),
                Err(e @ RecorderError::ProtocolViolation(_)) => {
                    warn!(%peer, error = %e, "Dropping link");
                    return Err(e);
                }
                Err(e) => warn!(%peer, error = %e, "Link failed"),
            }
        }
    }
}

async fn serve_link<F>(
    stream: TcpStream,
    handler: &ControlHandler,
    notifications: &mut mpsc::Receiver<Notification>,
    mut shutdown: Pin<&mut F>,
) -> AppResult<LinkEnd>
where
    F: Future<Output = ()>,
{
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(LinkEnd::Shutdown),
            Some(notification) = notifications.recv() => {
                write_frame(&mut writer, TAG_NOTIFY, &notification.encode()).await?;
            }
            tag = reader.read_u8() => {
                let tag = match tag {
                    Ok(tag) => tag,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(LinkEnd::Closed),
                    Err(e) => return Err(e.into()),
                };
                match tag {
                    TAG_WRITE => {
                        let code = reader.read_u8().await?;
                        match handler.handle_command(&[code]).await {
                            Ok(()) => {}
                            Err(e @ RecorderError::ProtocolViolation(_)) => return Err(e),
                            Err(e) => warn!(code, error = %e, "Command failed"),
                        }
                    }
                    TAG_READ => {
                        let max_len = usize::from(reader.read_u16_le().await?);
                        let payload = handler.handle_read(max_len).unwrap_or_else(|e| {
                            warn!(error = %e, "Read request failed");
                            Bytes::new()
                        });
                        write_data_frame(&mut writer, &payload).await?;
                    }
                    other => {
                        return Err(RecorderError::ProtocolViolation(format!(
                            "unknown frame tag {other:#04x}"
                        )));
                    }
                }
            }
        }
    }
}

async fn write_frame<W>(writer: &mut W, tag: u8, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = BytesMut::with_capacity(1 + body.len());
    frame.put_u8(tag);
    frame.put_slice(body);
    writer.write_all(&frame).await
}

async fn write_data_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "read payload too large"))?;
    let mut body = BytesMut::with_capacity(2 + payload.len());
    body.put_u16_le(len);
    body.put_slice(payload);
    write_frame(writer, TAG_DATA, &body).await
}

// =============================================================================
// ControlClient - Controller side of the link
// =============================================================================

/// Controller end of the TCP link.
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending: VecDeque<RecordMeta>,
}

enum IncomingFrame {
    Data(Bytes),
    Notify(RecordMeta),
}

impl ControlClient {
    /// Connect to a device at `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> AppResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            pending: VecDeque::new(),
        })
    }

    /// Send a command.
    pub async fn command(&mut self, command: Command) -> AppResult<()> {
        self.write_command_byte(command.code()).await
    }

    /// Send a raw command byte, known or not.
    pub async fn write_command_byte(&mut self, code: u8) -> AppResult<()> {
        write_frame(&mut self.writer, TAG_WRITE, &[code]).await?;
        Ok(())
    }

    /// Request up to `max_len` bytes of recorded data.
    ///
    /// Notifications arriving before the response are kept for
    /// [`next_notification`](Self::next_notification).
    pub async fn read(&mut self, max_len: u16) -> AppResult<Bytes> {
        let mut request = BytesMut::with_capacity(2);
        request.put_u16_le(max_len);
        write_frame(&mut self.writer, TAG_READ, &request).await?;

        loop {
            match self.next_frame().await? {
                IncomingFrame::Data(bytes) => return Ok(bytes),
                IncomingFrame::Notify(meta) => self.pending.push_back(meta),
            }
        }
    }

    /// Wait at most `timeout` for the next record meta notification.
    pub async fn next_notification(&mut self, timeout: Duration) -> AppResult<RecordMeta> {
        if let Some(meta) = self.pending.pop_front() {
            return Ok(meta);
        }
        let frame = tokio::time::timeout(timeout, self.next_frame())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no notification"))??;
        match frame {
            IncomingFrame::Notify(meta) => Ok(meta),
            IncomingFrame::Data(_) => Err(RecorderError::ProtocolViolation(
                "unsolicited read response".to_string(),
            )),
        }
    }

    /// Close the link.
    pub async fn disconnect(mut self) -> AppResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> AppResult<IncomingFrame> {
        match self.reader.read_u8().await? {
            TAG_DATA => {
                let len = usize::from(self.reader.read_u16_le().await?);
                let mut payload = vec![0u8; len];
                self.reader.read_exact(&mut payload).await?;
                Ok(IncomingFrame::Data(Bytes::from(payload)))
            }
            TAG_NOTIFY => {
                let mut body = [0u8; META_SIZE];
                self.reader.read_exact(&mut body).await?;
                Ok(IncomingFrame::Notify(RecordMeta::decode(&body)?))
            }
            other => Err(RecorderError::ProtocolViolation(format!(
                "unknown frame tag {other:#04x}"
            ))),
        }
    }
}
