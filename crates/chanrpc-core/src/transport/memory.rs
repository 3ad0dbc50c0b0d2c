//! In-process duplex link.

use super::{FrameReceiver, FrameSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Factory for connected in-memory endpoints.
pub struct MemoryLink;

impl MemoryLink {
    /// Two endpoints; frames pushed into one's sink arrive at the other.
    pub fn pair() -> (MemoryEndpoint, MemoryEndpoint) {
        let (to_left, left_inbound) = mpsc::unbounded_channel();
        let (to_right, right_inbound) = mpsc::unbounded_channel();
        (
            MemoryEndpoint {
                outbound: to_right,
                inbound: left_inbound,
            },
            MemoryEndpoint {
                outbound: to_left,
                inbound: right_inbound,
            },
        )
    }
}

/// One side of a [`MemoryLink`].
pub struct MemoryEndpoint {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryEndpoint {
    /// Outbound sink for a node or channeler on this side.
    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(self.outbound.clone())
    }

    /// Feed every frame arriving at this side into `receiver`, in order,
    /// until the peer's sinks are gone or the receiver is closed.
    pub fn attach<R: FrameReceiver>(self, receiver: R) -> JoinHandle<()> {
        tokio::spawn(pump(receiver, self.inbound))
    }

    /// Raw channel halves, for callers that want to inspect or script
    /// traffic themselves.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        (self.outbound, self.inbound)
    }
}

async fn pump<R: FrameReceiver>(receiver: R, mut inbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = inbound.recv().await {
        if receiver.is_closed() {
            break;
        }
        if let Err(e) = receiver.receive_frame(&frame).await {
            debug!("Inbound frame rejected: {}", e);
        }
    }
    debug!("Memory link pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::error::Result;
    use crate::message::Message;
    use crate::node::{RequestHandler, RpcNode};
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    #[async_trait::async_trait]
    impl RequestHandler for Echo {
        async fn handle_request(&self, node: &RpcNode, msg: Message) -> Result<()> {
            if let Some(id) = msg.id {
                let params = msg.params.unwrap_or(serde_json::Value::Null);
                node.send_response(&Message::response(id, params)).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_nodes_talk_over_memory_link() {
        let (left, right) = MemoryLink::pair();
        let client = RpcNode::new(NodeConfig::default().with_name("client"), left.sink());
        let server = RpcNode::new(NodeConfig::default().with_name("server"), right.sink());
        server.set_request_handler(Arc::new(Echo));

        left.attach(client.clone());
        right.attach(server.clone());

        let reply = client
            .call(Message::request("echo", Some(json!([1, 2]))), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply.result, Some(json!([1, 2])));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (left, right) = MemoryLink::pair();
        let sink = left.sink();
        let (_, mut inbound) = right.into_parts();

        for i in 0..10u8 {
            sink.push_frame(vec![i]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(inbound.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn test_pump_stops_when_receiver_closed() {
        let (left, right) = MemoryLink::pair();
        let node = RpcNode::new(NodeConfig::default(), right.sink());
        let pump = right.attach(node.clone());

        node.close();
        left.sink().push_frame(b"{}".to_vec()).await.unwrap();
        pump.await.unwrap();
    }
}
