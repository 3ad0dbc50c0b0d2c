//! Correlation engine.
//!
//! [`RpcNode`] turns a bare frame transport into JSON-RPC request/response:
//! it assigns ids to outgoing calls, tracks them as pending, matches inbound
//! responses by id, expires calls that never get an answer, and hands inbound
//! requests to a [`RequestHandler`].
//!
//! # Thread Safety
//!
//! The pending table sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Handlers are always invoked after the lock is
//! released, as independent tasks, so they may call back into the node.

mod handler;
mod pending;
mod sweep;

pub use handler::{
    channelled, CallOutcome, FnResponseHandler, RequestHandler, ResponseHandler,
    UnhandledResponseFn,
};

use crate::config::NodeConfig;
use crate::error::{ChannelError, ProtocolError, Result};
use crate::message::{codes, Message, MessageId, RpcError};
use crate::transport::FrameSink;
use pending::{PendingCall, PendingTable};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use sweep::SweepHandle;
use tokio::sync::oneshot;
use tracing::{debug, info_span, trace, warn, Span};

/// How `send_request` treats the message.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    /// Assign a fresh unique id instead of using the message's own.
    pub generate_id: bool,
    /// Send without registering a pending call.
    pub unhandled: bool,
    pub timeout: Duration,
}

impl RequestOptions {
    /// Generated id, response handled, expiring after `timeout`.
    pub fn handled(timeout: Duration) -> Self {
        Self {
            generate_id: true,
            unhandled: false,
            timeout,
        }
    }

    /// Generated id, no response tracking.
    pub fn unhandled() -> Self {
        Self {
            generate_id: true,
            unhandled: true,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_generate_id(mut self, generate: bool) -> Self {
        self.generate_id = generate;
        self
    }
}

/// Run a callback off the caller's path: as a task when inside a runtime,
/// inline otherwise.
pub(crate) fn dispatch<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => f(),
    }
}

pub(crate) struct NodeInner {
    config: NodeConfig,
    sink: Arc<dyn FrameSink>,
    pending: Mutex<PendingTable>,
    request_handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    unhandled_response: RwLock<Option<UnhandledResponseFn>>,
    sweep: Mutex<Option<SweepHandle>>,
    span: Span,
}

impl NodeInner {
    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_sweep(&self) {
        let sweep = self.sweep.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sweep) = sweep {
            sweep.stop();
        }
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.stop_sweep();
        let drained = self.lock_pending().close();
        for (_, call) in drained {
            call.handler.on_closed();
        }
    }
}

/// JSON-RPC correlation engine. Clones share the same state.
#[derive(Clone)]
pub struct RpcNode {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for RpcNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcNode")
            .field("name", &self.inner.config.name)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcNode {
    /// Create a node that pushes outgoing frames into `sink`.
    pub fn new(config: NodeConfig, sink: Arc<dyn FrameSink>) -> Self {
        let span = info_span!("rpc_node", name = %config.name);
        Self {
            inner: Arc::new(NodeInner {
                config,
                sink,
                pending: Mutex::new(PendingTable::default()),
                request_handler: RwLock::new(None),
                unhandled_response: RwLock::new(None),
                sweep: Mutex::new(None),
                span,
            }),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self
            .inner
            .request_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_unhandled_response_handler(&self, handler: UnhandledResponseFn) {
        *self
            .inner
            .unhandled_response
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_pending().closed
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().calls.len()
    }

    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.inner.lock_pending().calls.contains_key(id)
    }

    /// Serialize and push without shape checks. The version tag is reset.
    ///
    /// The sink's error is returned unmodified.
    pub async fn send_message(&self, msg: &Message) -> Result<()> {
        let frame = msg.to_vec()?;
        trace!(parent: &self.inner.span, "Pushing {} byte frame", frame.len());
        self.inner.sink.push_frame(frame).await?;
        Ok(())
    }

    /// Send a request; returns the id used.
    ///
    /// Handled requests (`!opts.unhandled`) require `handler` and register a
    /// pending call that resolves through exactly one of its callbacks.
    pub async fn send_request(
        &self,
        msg: Message,
        opts: RequestOptions,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<MessageId> {
        self.send_request_with_hook(msg, opts, handler, |_| {}).await
    }

    /// Like [`send_request`](Self::send_request), but runs `hook` with the
    /// final id after the call is registered and before the frame is pushed.
    pub async fn send_request_with_hook<H>(
        &self,
        mut msg: Message,
        opts: RequestOptions,
        handler: Option<Box<dyn ResponseHandler>>,
        hook: H,
    ) -> Result<MessageId>
    where
        H: FnOnce(&MessageId) + Send,
    {
        if !msg.has_request_fields() {
            return Err(ChannelError::invalid_usage("msg must be a request"));
        }

        let id = self.register(&mut msg, opts, handler)?;

        if !opts.unhandled {
            self.ensure_sweep();
        }

        hook(&id);

        debug!(parent: &self.inner.span, "Sending request {} ({:?})", id, msg.method);
        if let Err(e) = self.send_message(&msg).await {
            debug!(parent: &self.inner.span, "Sending request {} failed: {}", id, e);
            if !opts.unhandled {
                self.inner.lock_pending().calls.remove(&id);
            }
            return Err(e);
        }

        Ok(id)
    }

    fn register(
        &self,
        msg: &mut Message,
        opts: RequestOptions,
        handler: Option<Box<dyn ResponseHandler>>,
    ) -> Result<MessageId> {
        let mut table = self.inner.lock_pending();

        if table.closed {
            return Err(ChannelError::Closed);
        }

        let id = if opts.generate_id {
            table.unique_id()
        } else {
            msg.id.clone().ok_or_else(|| {
                ChannelError::invalid_usage("request must carry an id when ids are not generated")
            })?
        };
        msg.id = Some(id.clone());
        msg.validate()?;

        if !opts.unhandled {
            let handler = handler.ok_or_else(|| {
                ChannelError::invalid_usage("handled request requires a response handler")
            })?;
            if table.calls.contains_key(&id) {
                return Err(ChannelError::invalid_usage(format!(
                    "id {} is already pending",
                    id
                )));
            }
            let ticks = self.inner.config.ticks_for(opts.timeout);
            table.calls.insert(id.clone(), PendingCall::new(handler, ticks));
        }

        Ok(id)
    }

    /// Send a handled call with a generated id and wait for its outcome.
    pub async fn call(&self, msg: Message, timeout: Duration) -> Result<Message> {
        self.call_with_hook(msg, timeout, |_| {}).await
    }

    /// Like [`call`](Self::call), with a hook that sees the id before sending.
    pub async fn call_with_hook<H>(&self, msg: Message, timeout: Duration, hook: H) -> Result<Message>
    where
        H: FnOnce(&MessageId) + Send,
    {
        let (tx, rx) = oneshot::channel::<CallOutcome>();
        self.send_request_with_hook(msg, RequestOptions::handled(timeout), Some(Box::new(tx)), hook)
            .await?;
        rx.await.map_err(|_| ChannelError::Closed)?.into_result()
    }

    pub async fn send_notification(&self, msg: &Message) -> Result<()> {
        if !msg.is_notification() {
            return Err(ChannelError::invalid_usage("not a notification"));
        }
        self.send_message(msg).await
    }

    pub async fn send_response(&self, msg: &Message) -> Result<()> {
        if !msg.is_response() {
            return Err(ChannelError::invalid_usage(
                "msg must be a response, but not an error",
            ));
        }
        self.send_message(msg).await
    }

    pub async fn send_error(&self, msg: &Message) -> Result<()> {
        if !msg.is_error() {
            return Err(ChannelError::invalid_usage(
                "send_error is only for error responses",
            ));
        }
        self.send_message(msg).await
    }

    /// Reply to a call with an error object built from `code` and `message`.
    pub async fn reply_error(&self, id: MessageId, code: i64, message: impl Into<String>) -> Result<()> {
        self.send_error(&Message::error_response(id, RpcError::new(code, message)))
            .await
    }

    /// Feed one inbound frame into the node.
    ///
    /// Returns `ChannelError::Protocol` when the peer sent something
    /// oversized or malformed, or when the request handler reports a
    /// protocol violation. Responses that match no pending call are not an
    /// error.
    pub async fn push_message_from_outside(&self, data: &[u8]) -> Result<()> {
        if let Some(limit) = self.inner.config.max_inbound_frame {
            if data.len() >= limit {
                return Err(ProtocolError::FrameTooLarge {
                    size: data.len(),
                    limit,
                }
                .into());
            }
        }

        let msg = Message::from_slice(data)?;

        if msg.has_request_fields() {
            return self.dispatch_request(msg).await;
        }

        let Some(id) = msg.id.clone() else {
            return Err(ProtocolError::InvalidRequest("no id field for response message".into()).into());
        };

        let call = self.inner.lock_pending().calls.remove(&id);
        match call {
            Some(call) => {
                trace!(parent: &self.inner.span, "Matched response {}", id);
                dispatch(move || call.handler.on_response(msg));
            }
            None => {
                let unhandled = self
                    .inner
                    .unhandled_response
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match unhandled {
                    Some(cb) => dispatch(move || cb(msg)),
                    None => debug!(parent: &self.inner.span, "Dropping unmatched response {}", id),
                }
            }
        }

        Ok(())
    }

    async fn dispatch_request(&self, msg: Message) -> Result<()> {
        let handler = self
            .inner
            .request_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => handler.handle_request(self, msg).await,
            None => {
                let method = msg.method.clone().unwrap_or_default();
                warn!(parent: &self.inner.span, "No request handler for {}", method);
                if let Some(id) = msg.id {
                    self.reply_error(id, codes::METHOD_NOT_FOUND, "Method not found")
                        .await?;
                }
                Err(ProtocolError::MethodNotFound(method).into())
            }
        }
    }

    /// Re-arm a pending call's countdown. `None` keeps the original timeout.
    ///
    /// Returns whether the id was pending.
    pub fn reset_response_timeout(&self, id: &MessageId, new_timeout: Option<Duration>) -> bool {
        let ticks = new_timeout.map(|t| self.inner.config.ticks_for(t));
        self.inner.lock_pending().reset(id, ticks)
    }

    /// Close the node: later requests fail with `Closed`, the sweep stops and
    /// every pending call gets `on_closed` exactly once.
    pub fn close(&self) {
        let drained = {
            let mut table = self.inner.lock_pending();
            if table.closed {
                return;
            }
            table.close()
        };

        self.inner.stop_sweep();
        debug!(parent: &self.inner.span, "Closed with {} pending calls", drained.len());

        for (_, call) in drained {
            dispatch(move || call.handler.on_closed());
        }
    }

    fn ensure_sweep(&self) {
        let mut sweep = self.inner.sweep.lock().unwrap_or_else(PoisonError::into_inner);
        if sweep.as_ref().is_some_and(SweepHandle::is_running) {
            return;
        }
        if self.inner.lock_pending().closed {
            return;
        }
        debug!(parent: &self.inner.span, "Starting timeout sweep");
        *sweep = Some(SweepHandle::spawn(
            Arc::downgrade(&self.inner),
            self.inner.config.tick,
        ));
    }
}
