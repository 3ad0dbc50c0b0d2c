//! Length-prefixed frames over TCP.
//!
//! ```text
//! [u32 BE: len][payload of len bytes]
//! ```
//!
//! Outbound frames go through a bounded queue drained by a writer task, so
//! pushing never interleaves two frames on the stream.

use super::{FrameReceiver, FrameSink};
use crate::config::TcpConfig;
use crate::error::{ChannelError, Result, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Read one length-prefixed frame.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> std::result::Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > TcpConfig::MAX_FRAME_SIZE {
        return Err(TransportError::Other(format!(
            "frame size {} exceeds maximum {}",
            len,
            TcpConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> std::result::Result<(), TransportError> {
    if payload.len() > TcpConfig::MAX_FRAME_SIZE {
        return Err(TransportError::Other(format!(
            "frame size {} exceeds maximum {}",
            payload.len(),
            TcpConfig::MAX_FRAME_SIZE
        )));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Outbound half of a [`TcpLink`].
#[derive(Clone)]
pub struct TcpSink {
    queue: mpsc::Sender<Vec<u8>>,
}

#[async_trait::async_trait]
impl FrameSink for TcpSink {
    async fn push_frame(&self, frame: Vec<u8>) -> std::result::Result<(), TransportError> {
        self.queue.push_frame(frame).await
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut queue: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("TCP writer stopped: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Stops a running [`TcpLink::run_reader`] loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// One framed TCP connection.
pub struct TcpLink {
    reader: OwnedReadHalf,
    sink: TcpSink,
    peer_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    writer_task: JoinHandle<()>,
}

impl TcpLink {
    /// Connect to `addr`, giving up after `TcpConfig::CONNECT_TIMEOUT`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = tokio::time::timeout(TcpConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })?
            .map_err(TransportError::from)?;
        Self::from_stream(stream)
    }

    /// Accept the next connection on `listener`.
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _) = listener.accept().await.map_err(TransportError::from)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr().map_err(TransportError::from)?;
        stream.set_nodelay(true).map_err(TransportError::from)?;
        let (reader, writer) = stream.into_split();

        let (queue_tx, queue_rx) = mpsc::channel(TcpConfig::OUTBOUND_QUEUE);
        let writer_task = tokio::spawn(write_loop(writer, queue_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("TCP link established with {}", peer_addr);
        Ok(Self {
            reader,
            sink: TcpSink { queue: queue_tx },
            peer_addr,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            writer_task,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(self.sink.clone())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Feed inbound frames into `receiver` until EOF, shutdown, or the
    /// receiver closes. Rejected frames are logged and skipped.
    pub async fn run_reader<R: FrameReceiver>(self, receiver: R) -> Result<()> {
        let TcpLink {
            mut reader,
            sink,
            peer_addr,
            shutdown_rx: mut shutdown,
            writer_task,
            ..
        } = self;
        // Receivers hold their own sink clones; drop ours so the writer can
        // finish once they are gone.
        drop(sink);

        let result = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!("TCP peer {} closed the connection", peer_addr);
                        break Ok(());
                    }
                    Err(e) => break Err(ChannelError::from(e)),
                },
                _ = shutdown.changed() => {
                    debug!("TCP link to {} shutting down", peer_addr);
                    break Ok(());
                }
            };

            if receiver.is_closed() {
                break Ok(());
            }
            match receiver.receive_frame(&frame).await {
                Ok(()) => {}
                Err(ChannelError::Closed) => break Ok(()),
                Err(e) if e.is_protocol_error() => {
                    warn!("Rejected frame from {}: {}", peer_addr, e);
                }
                Err(e) => debug!("Frame from {} failed: {}", peer_addr, e),
            }
        };

        if result.is_err() {
            writer_task.abort();
        }
        result
    }
}
