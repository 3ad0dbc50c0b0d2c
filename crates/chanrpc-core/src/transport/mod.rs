//! Transport boundary.
//!
//! The core only pushes opaque frames out through a [`FrameSink`] and accepts
//! opaque frames through a [`FrameReceiver`]. One frame carries one message;
//! nothing below that is assumed.
//!
//! - [`memory`]: in-process duplex link, used by tests and the demo
//! - [`tcp`]: length-prefixed framing over a TCP stream

pub mod memory;
pub mod tcp;

use crate::channeler::Channeler;
use crate::error::{Result, TransportError};
use crate::node::RpcNode;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use memory::{MemoryEndpoint, MemoryLink};
pub use tcp::{read_frame, write_frame, ShutdownHandle, TcpLink, TcpSink};

/// Outbound push hook.
#[async_trait::async_trait]
pub trait FrameSink: Send + Sync + 'static {
    /// Hand one frame to the transport.
    async fn push_frame(&self, frame: Vec<u8>) -> std::result::Result<(), TransportError>;
}

#[async_trait::async_trait]
impl FrameSink for mpsc::UnboundedSender<Vec<u8>> {
    async fn push_frame(&self, frame: Vec<u8>) -> std::result::Result<(), TransportError> {
        self.send(frame).map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait::async_trait]
impl FrameSink for mpsc::Sender<Vec<u8>> {
    async fn push_frame(&self, frame: Vec<u8>) -> std::result::Result<(), TransportError> {
        self.send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait::async_trait]
impl<S: FrameSink + ?Sized> FrameSink for Arc<S> {
    async fn push_frame(&self, frame: Vec<u8>) -> std::result::Result<(), TransportError> {
        (**self).push_frame(frame).await
    }
}

/// Inbound side: whatever consumes the frames a transport reads.
#[async_trait::async_trait]
pub trait FrameReceiver: Send + Sync + 'static {
    async fn receive_frame(&self, frame: &[u8]) -> Result<()>;

    /// Once true, transports stop feeding frames.
    fn is_closed(&self) -> bool;
}

#[async_trait::async_trait]
impl FrameReceiver for RpcNode {
    async fn receive_frame(&self, frame: &[u8]) -> Result<()> {
        self.push_message_from_outside(frame).await
    }

    fn is_closed(&self) -> bool {
        RpcNode::is_closed(self)
    }
}

#[async_trait::async_trait]
impl FrameReceiver for Channeler {
    async fn receive_frame(&self, frame: &[u8]) -> Result<()> {
        self.push_message_from_outside(frame).await
    }

    fn is_closed(&self) -> bool {
        Channeler::is_closed(self)
    }
}

/// Sink that always fails; useful for exercising transport error paths.
#[derive(Debug, Default, Clone)]
pub struct ClosedSink;

#[async_trait::async_trait]
impl FrameSink for ClosedSink {
    async fn push_frame(&self, _frame: Vec<u8>) -> std::result::Result<(), TransportError> {
        Err(TransportError::Disconnected)
    }
}
