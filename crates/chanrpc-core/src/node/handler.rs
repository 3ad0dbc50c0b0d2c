//! Callbacks invoked by the correlation engine.

use super::RpcNode;
use crate::error::{ChannelError, Result};
use crate::message::Message;
use tokio::sync::oneshot;

/// How a pending call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Response(Message),
    Timeout,
    Closed,
}

impl CallOutcome {
    /// Map the outcome onto the error taxonomy.
    pub fn into_result(self) -> Result<Message> {
        match self {
            CallOutcome::Response(msg) => Ok(msg),
            CallOutcome::Timeout => Err(ChannelError::Timeout),
            CallOutcome::Closed => Err(ChannelError::Closed),
        }
    }
}

/// Receives the single outcome of a pending call.
///
/// Exactly one method is invoked, exactly once; each consumes the handler.
/// Invocations run as independent tasks, so a handler may call back into
/// the node.
pub trait ResponseHandler: Send + 'static {
    fn on_response(self: Box<Self>, msg: Message);
    fn on_timeout(self: Box<Self>);
    fn on_closed(self: Box<Self>);
}

impl ResponseHandler for oneshot::Sender<CallOutcome> {
    fn on_response(self: Box<Self>, msg: Message) {
        let _ = (*self).send(CallOutcome::Response(msg));
    }

    fn on_timeout(self: Box<Self>) {
        let _ = (*self).send(CallOutcome::Timeout);
    }

    fn on_closed(self: Box<Self>) {
        let _ = (*self).send(CallOutcome::Closed);
    }
}

/// Adapts a closure taking the [`CallOutcome`] into a [`ResponseHandler`].
pub struct FnResponseHandler<F>(pub F);

impl<F> ResponseHandler for FnResponseHandler<F>
where
    F: FnOnce(CallOutcome) + Send + 'static,
{
    fn on_response(self: Box<Self>, msg: Message) {
        (self.0)(CallOutcome::Response(msg))
    }

    fn on_timeout(self: Box<Self>) {
        (self.0)(CallOutcome::Timeout)
    }

    fn on_closed(self: Box<Self>) {
        (self.0)(CallOutcome::Closed)
    }
}

/// Create a handler paired with a receiver for its outcome.
pub fn channelled() -> (Box<dyn ResponseHandler>, oneshot::Receiver<CallOutcome>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(tx), rx)
}

/// Handles inbound request-shaped messages (calls and notifications).
///
/// The returned error is handed back to the caller of
/// `push_message_from_outside`.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle_request(&self, node: &RpcNode, msg: Message) -> Result<()>;
}

/// Callback for responses that match no pending call.
pub type UnhandledResponseFn = std::sync::Arc<dyn Fn(Message) + Send + Sync>;
