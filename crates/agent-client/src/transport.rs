use agent_protocol::FrameCodec;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Byte stream to the agent.
#[async_trait]
pub trait Transport: Send {
    /// Waits at most `slice` for readable data. `Ok(false)` means nothing arrived yet.
    async fn wait_readable(&mut self, slice: Duration) -> io::Result<bool>;

    /// Non-blocking read. `Ok(0)` means no data was actually available; a closed
    /// peer is reported as `UnexpectedEof`.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn has_error(&self) -> bool;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self) -> io::Result<Self::Transport>;
}

#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> io::Result<TcpTransport> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport::new(stream))
    }
}

pub struct TcpTransport {
    stream: TcpStream,
    failed: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            failed: false,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn wait_readable(&mut self, slice: Duration) -> io::Result<bool> {
        match timeout(slice, self.stream.readable()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(err)) => {
                self.failed = true;
                Err(err)
            }
            Err(_) => Ok(false),
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.try_read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.failed = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "agent closed the connection",
                ))
            }
            Ok(read) => Ok(read),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Err(err) = self.stream.write_all(bytes).await {
            self.failed = true;
            return Err(err);
        }
        Ok(())
    }

    fn has_error(&self) -> bool {
        self.failed
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// An open transport plus the bytes received on it that do not yet form a frame.
pub struct Connection<T> {
    transport: T,
    frames: FrameCodec,
    scratch: Vec<u8>,
    max_frame_length: usize,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, max_frame_length: usize, read_chunk: usize) -> Self {
        Self {
            transport,
            frames: FrameCodec::with_limit(max_frame_length),
            scratch: vec![0; read_chunk.max(1)],
            max_frame_length,
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.transport.has_error()
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drops buffered bytes and codec state so a new exchange starts clean.
    pub(crate) fn reset_frames(&mut self) {
        self.frames = FrameCodec::with_limit(self.max_frame_length);
    }

    pub(crate) async fn send_payload(&mut self, payload: &str) -> Result<(), ClientError> {
        let bytes = self.frames.encode(payload.as_bytes())?;
        self.transport
            .write_all(&bytes)
            .await
            .map_err(ClientError::from_io)
    }

    pub(crate) fn buffered_message(&mut self) -> Result<Option<Bytes>, ClientError> {
        Ok(self.frames.extract_message()?)
    }

    /// Reads one bounded chunk and returns a message if it completed one.
    pub(crate) fn read_available(&mut self) -> Result<Option<Bytes>, ClientError> {
        let read = self
            .transport
            .try_read(&mut self.scratch)
            .map_err(ClientError::from_io)?;
        if read > 0 {
            self.frames.feed(&self.scratch[..read]);
        }
        self.buffered_message()
    }

    pub async fn close(mut self) {
        self.transport.close().await;
    }
}

/// Drives `connector` until it yields a transport, waking every `slice` to
/// observe the deadline and cancellation.
pub(crate) async fn connect_within<C: Connector>(
    connector: &C,
    deadline: Instant,
    slice: Duration,
    cancel: &CancellationToken,
) -> Result<C::Transport, ClientError> {
    let mut connect = connector.connect();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ClientError::ConnectTimeout);
        }
        tokio::select! {
            result = &mut connect => return result.map_err(ClientError::Connect),
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(slice.min(remaining)) => {}
        }
    }
}

/// Waits in `slice` steps until `transport` is readable or `deadline` passes.
pub(crate) async fn readable_within<T: Transport>(
    transport: &mut T,
    deadline: Instant,
    slice: Duration,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ClientError::ReadTimeout);
        }
        let ready = tokio::select! {
            ready = transport.wait_readable(slice.min(remaining)) => {
                ready.map_err(ClientError::from_io)?
            }
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };
        if ready {
            return Ok(());
        }
        if transport.has_error() {
            return Err(ClientError::Transport(io::Error::other(
                "transport reported an error",
            )));
        }
    }
}
