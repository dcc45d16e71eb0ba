//! Length-prefixed framing over any byte stream.
//!
//! Each frame is a 4-byte big-endian payload length followed by the payload.
//! Reads go through a single [`FrameReader`] per stream. Writes go through a
//! [`FrameSender`] outbox drained by one writer task, so a header and its
//! payload always reach the stream back to back no matter how many tasks send.

use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ChannelError;

pub const FRAME_HEADER_LEN: usize = 4;

/// Frames above this size are rejected in both directions.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub max_frame_len: usize,
    pub outbox_capacity: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Header and payload in one contiguous buffer.
pub fn encode_frame(payload: &[u8], max_len: usize) -> Result<Bytes, ChannelError> {
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(ChannelError::TooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn is_reset(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Reading half of a framed channel.
pub struct FrameReader<R> {
    inner: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Waits for the next complete frame and returns its payload.
    ///
    /// End of stream (or a reset) with nothing buffered is [`ChannelError::Closed`];
    /// end of stream inside a header or payload is [`ChannelError::Framing`].
    pub async fn recv(&mut self) -> Result<Bytes, ChannelError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < FRAME_HEADER_LEN {
            let n = match self.inner.read(&mut header[filled..]).await {
                Ok(n) => n,
                Err(e) if filled == 0 && is_reset(&e) => return Err(ChannelError::Closed),
                Err(e) => return Err(ChannelError::Io(e)),
            };
            if n == 0 {
                if filled == 0 {
                    return Err(ChannelError::Closed);
                }
                return Err(ChannelError::Framing(format!(
                    "stream ended after {filled} of {FRAME_HEADER_LEN} header bytes"
                )));
            }
            filled += n;
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_len {
            return Err(ChannelError::TooLarge {
                len,
                max: self.max_len,
            });
        }

        let mut payload = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = self.inner.read(&mut payload[filled..]).await?;
            if n == 0 {
                return Err(ChannelError::Framing(format!(
                    "stream ended after {filled} of {len} payload bytes"
                )));
            }
            filled += n;
        }
        Ok(payload.freeze())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

/// Cloneable writing handle of a framed channel.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Outbound>,
    stop: Arc<watch::Sender<bool>>,
    max_len: usize,
}

impl FrameSender {
    /// Queues one frame. Fails once the writer task has stopped.
    ///
    /// Waits while the outbox is full.
    pub async fn send(&self, payload: &[u8]) -> Result<(), ChannelError> {
        let frame = encode_frame(payload, self.max_len)?;
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Asks the writer to flush what is queued and close the write side.
    ///
    /// Never waits. With a full outbox the writer is stopped immediately.
    pub fn shutdown(&self) {
        match self.tx.try_send(Outbound::Shutdown) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => self.abort(),
        }
    }

    /// Stops the writer without flushing, even in the middle of a write.
    pub fn abort(&self) {
        self.stop.send_replace(true);
    }

    /// Resolves once the writer task has exited.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Starts the writer task that owns `writer`.
///
/// The task ends after a shutdown request, once every sender is dropped, on
/// [`FrameSender::abort`], or on the first write error.
pub fn spawn_writer<W>(
    writer: W,
    options: ChannelOptions,
) -> (FrameSender, JoinHandle<Result<(), ChannelError>>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(options.outbox_capacity.max(1));
    let (stop, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(write_loop(writer, rx, stop_rx));
    (
        FrameSender {
            tx,
            stop: Arc::new(stop),
            max_len: options.max_frame_len,
        },
        handle,
    )
}

async fn stop_requested(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        // Every sender is gone; the outbox drains on its own.
        std::future::pending::<()>().await;
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    stop: watch::Receiver<bool>,
) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    let stopped = stop_requested(stop);
    tokio::pin!(stopped);

    let result = loop {
        let out = tokio::select! {
            biased;
            _ = &mut stopped => break Ok(()),
            out = rx.recv() => out,
        };
        match out {
            Some(Outbound::Frame(frame)) => {
                let written = tokio::select! {
                    biased;
                    _ = &mut stopped => break Ok(()),
                    res = write_all_flush(&mut writer, &frame) => res,
                };
                if let Err(e) = written {
                    debug!("frame writer stopped: {}", e);
                    break Err(ChannelError::Io(e));
                }
            }
            Some(Outbound::Shutdown) | None => {
                tokio::select! {
                    biased;
                    _ = &mut stopped => {}
                    _ = writer.shutdown() => {}
                }
                break Ok(());
            }
        }
    };
    rx.close();
    result
}

async fn write_all_flush<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
