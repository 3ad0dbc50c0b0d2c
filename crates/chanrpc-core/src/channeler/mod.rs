//! Buffer channeler.
//!
//! Moves byte buffers of any size across a transport whose frames are capped
//! at a few hundred bytes. The sender announces a buffer with `n`, the
//! receiver asks for its size with `gbi` and pulls it back slice by slice
//! with `gbs`, then answers the announce.
//!
//! ```text
//! sender                         receiver
//!   | -- n {id} ------------------> |
//!   | <------------ gbi {buffid} -- |
//!   | -- {s} ---------------------> |
//!   | <--- gbs {buffid,start,end} --|   repeated per slice
//!   | -- {data} ------------------> |
//!   | <-------------------- true -- |   after the last slice
//! ```

mod buffer;
mod lock_context;
pub mod protocol;
mod receive;
mod serve;
pub mod slicing;

pub use buffer::{BufferSource, SeekableSource};
pub use slicing::{slice_count, slice_ranges};

use crate::config::ChannelerConfig;
use crate::error::{ChannelError, ProtocolError, Result};
use crate::message::{Message, MessageId};
use crate::node::{dispatch, RequestHandler, RpcNode};
use crate::transport::FrameSink;
use buffer::{register_buffer, BufferTable};
use bytes::Bytes;
use lock_context::LockContext;
use protocol::{NewBufferParams, METHOD_NEW_BUFFER_AVAILABLE};
use receive::{Admission, ReceiveTable};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Receives each completely pulled buffer.
pub type DataCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Observes protocol violations committed by the peer.
pub type ProtocolErrorCallback = Arc<dyn Fn(&ProtocolError) + Send + Sync>;

pub(crate) struct ChannelerInner {
    config: ChannelerConfig,
    node: RpcNode,
    buffers: Mutex<BufferTable>,
    receiving: Mutex<ReceiveTable>,
    on_data: Option<DataCallback>,
    on_peer_protocol_error: Option<ProtocolErrorCallback>,
}

impl ChannelerInner {
    /// Look up a buffer on offer, returning its source and announce id.
    fn lookup(&self, buffer_id: &str) -> Result<(Arc<dyn BufferSource>, Option<MessageId>)> {
        LockContext::new(&self.buffers)
            .with(|table| {
                table
                    .get(buffer_id)
                    .map(|w| (w.source.clone(), w.request_id.clone()))
            })
            .ok_or_else(|| ProtocolError::InvalidBufferId(buffer_id.to_string()).into())
    }

    /// Claim `buffer_id` for a pull started by `announce_id`.
    fn begin_receive(&self, buffer_id: &str, announce_id: &MessageId) -> Result<Admission> {
        let limit = self.config.max_concurrent_receives;
        LockContext::new(&self.receiving)
            .with(|table| table.admit(buffer_id, announce_id, limit))
    }

    fn finish_receive(&self, buffer_id: &str) {
        LockContext::new(&self.receiving).with(|table| table.finish(buffer_id));
    }

    /// The peer is still pulling, so the announce call is not stale yet.
    fn keep_announce_alive(&self, request_id: Option<&MessageId>) {
        if let Some(id) = request_id {
            if !self.node.reset_response_timeout(id, None) {
                debug!(parent: self.node.span(), "Announce {} no longer pending", id);
            }
        }
    }

    fn report_protocol_error(&self, err: &ProtocolError) {
        warn!(parent: self.node.span(), "Peer protocol error: {}", err);
        if let Some(cb) = self.on_peer_protocol_error.clone() {
            let err = err.clone();
            dispatch(move || cb(&err));
        }
    }
}

/// Routes inbound requests from the node back to its channeler.
struct ChannelerRequests {
    inner: Weak<ChannelerInner>,
}

#[async_trait::async_trait]
impl RequestHandler for ChannelerRequests {
    async fn handle_request(&self, node: &RpcNode, msg: Message) -> Result<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(ChannelError::Closed);
        };
        serve::handle_request(&inner, node, msg).await
    }
}

/// Builder for [`Channeler`].
pub struct ChannelerBuilder {
    sink: Arc<dyn FrameSink>,
    config: ChannelerConfig,
    name: Option<String>,
    on_data: Option<DataCallback>,
    on_peer_protocol_error: Option<ProtocolErrorCallback>,
}

impl ChannelerBuilder {
    pub fn config(mut self, config: ChannelerConfig) -> Self {
        self.config = config;
        self
    }

    /// Name used for the tracing span of this side.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(f));
        self
    }

    pub fn on_peer_protocol_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProtocolError) + Send + Sync + 'static,
    {
        self.on_peer_protocol_error = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and wire the channeler to its node.
    pub fn build(self) -> Result<Channeler> {
        let mut config = self.config;
        if let Some(name) = self.name {
            config.node.name = name;
        }
        config.validate()?;

        let node = RpcNode::new(config.node.clone(), self.sink);
        let inner = Arc::new(ChannelerInner {
            config,
            node,
            buffers: Mutex::new(BufferTable::default()),
            receiving: Mutex::new(ReceiveTable::default()),
            on_data: self.on_data,
            on_peer_protocol_error: self.on_peer_protocol_error,
        });

        inner.node.set_request_handler(Arc::new(ChannelerRequests {
            inner: Arc::downgrade(&inner),
        }));

        Ok(Channeler { inner })
    }
}

/// Sends and receives buffers over one peer link. Clones share the same
/// state.
#[derive(Clone)]
pub struct Channeler {
    inner: Arc<ChannelerInner>,
}

impl std::fmt::Debug for Channeler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channeler")
            .field("node", &self.inner.node)
            .field("offered", &self.offered_count())
            .finish()
    }
}

impl Channeler {
    pub fn builder(sink: Arc<dyn FrameSink>) -> ChannelerBuilder {
        ChannelerBuilder {
            sink,
            config: ChannelerConfig::default(),
            name: None,
            on_data: None,
            on_peer_protocol_error: None,
        }
    }

    pub fn config(&self) -> &ChannelerConfig {
        &self.inner.config
    }

    /// The underlying correlation engine.
    pub fn node(&self) -> &RpcNode {
        &self.inner.node
    }

    pub fn is_closed(&self) -> bool {
        self.inner.node.is_closed()
    }

    /// Buffers currently on offer to the peer.
    pub fn offered_count(&self) -> usize {
        LockContext::new(&self.inner.buffers).with(|table| table.len())
    }

    /// Announced buffers this side is still pulling.
    pub fn receiving_count(&self) -> usize {
        LockContext::new(&self.inner.receiving).with(|table| table.len())
    }

    /// Offer an in-memory buffer to the peer and wait until it has been
    /// pulled.
    pub async fn channel_data(&self, data: impl Into<Bytes>) -> Result<Message> {
        let data: Bytes = data.into();
        self.channel_source(Arc::new(data)).await
    }

    /// Offer `source` to the peer and wait for its answer to the announce.
    ///
    /// Returns the peer's final response. A peer error response becomes
    /// `ProtocolError::Rejected` when the peer refused the buffer, or
    /// `ChannelError::PeerFailed` when its pull failed on its own side.
    pub async fn channel_source(&self, source: Arc<dyn BufferSource>) -> Result<Message> {
        let inner = &self.inner;
        if inner.node.is_closed() {
            return Err(ChannelError::Closed);
        }

        let buffer_id = register_buffer(&mut LockContext::new(&inner.buffers), source);
        let params = serde_json::to_value(NewBufferParams {
            id: buffer_id.clone(),
        });
        let params = match params {
            Ok(params) => params,
            Err(e) => {
                LockContext::new(&inner.buffers).with(|table| table.remove(&buffer_id));
                return Err(e.into());
            }
        };

        debug!(parent: inner.node.span(), "Announcing buffer {}", buffer_id);
        let announce = Message::request(METHOD_NEW_BUFFER_AVAILABLE, Some(params));
        let result = inner
            .node
            .call_with_hook(announce, inner.config.announce_timeout, |request_id| {
                LockContext::new(&inner.buffers)
                    .with(|table| table.set_request_id(&buffer_id, request_id.clone()));
            })
            .await;

        LockContext::new(&inner.buffers).with(|table| table.remove(&buffer_id));

        let response = result?;
        if let Some(error) = response.error {
            debug!(
                parent: inner.node.span(),
                "Buffer {} rejected by peer: {}", buffer_id, error
            );
            return Err(ChannelError::from_peer_error(error));
        }

        debug!(parent: inner.node.span(), "Buffer {} delivered", buffer_id);
        Ok(response)
    }

    /// Feed one inbound frame. Protocol violations are also reported to the
    /// peer-protocol-error observer.
    pub async fn push_message_from_outside(&self, data: &[u8]) -> Result<()> {
        let result = self.inner.node.push_message_from_outside(data).await;
        if let Err(ChannelError::Protocol(e)) = &result {
            self.inner.report_protocol_error(e);
        }
        result
    }

    /// Close the node, failing pending calls with `Closed`, and drop every
    /// buffer on offer or being received.
    pub fn close(&self) {
        self.inner.node.close();
        LockContext::new(&self.inner.buffers).with(|table| table.clear());
        LockContext::new(&self.inner.receiving).with(|table| table.clear());
    }
}
