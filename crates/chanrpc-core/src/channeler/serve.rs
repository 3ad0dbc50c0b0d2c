//! Answering the peer's channeler requests.

use super::buffer::read_source;
use super::protocol::{
    parse_params, BufferInfo, BufferInfoParams, NewBufferParams, SliceData, SliceParams,
    METHOD_GET_BUFFER_INFO, METHOD_GET_BUFFER_SLICE, METHOD_NEW_BUFFER_AVAILABLE,
};
use super::receive::{self, Admission};
use super::ChannelerInner;
use crate::error::{ChannelError, ProtocolError, Result};
use crate::message::Message;
use crate::node::RpcNode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(super) async fn handle_request(
    inner: &Arc<ChannelerInner>,
    node: &RpcNode,
    msg: Message,
) -> Result<()> {
    let method = msg.method.clone().unwrap_or_default();

    let Some(id) = msg.id.clone() else {
        warn!(parent: node.span(), "Ignoring notification {}", method);
        return Err(ProtocolError::InvalidRequest(format!(
            "'{}' must be sent as a call",
            method
        ))
        .into());
    };

    let result = match method.as_str() {
        METHOD_NEW_BUFFER_AVAILABLE => accept_announce(inner, &msg).map(|()| None),
        METHOD_GET_BUFFER_INFO => buffer_info(inner, &msg).map(Some),
        METHOD_GET_BUFFER_SLICE => buffer_slice(inner, &msg).await.map(Some),
        _ => Err(ProtocolError::MethodNotFound(method.clone()).into()),
    };

    match result {
        // The announce is answered by the pull task once it finishes.
        Ok(None) => Ok(()),
        Ok(Some(value)) => node.send_response(&Message::response(id, value)).await,
        Err(e) => {
            debug!(parent: node.span(), "Rejecting {} {}: {}", method, id, e);
            node.reply_error(id, e.to_rpc_error_code(), e.to_string())
                .await?;
            Err(e)
        }
    }
}

/// `n`: start pulling the announced buffer in the background.
fn accept_announce(inner: &Arc<ChannelerInner>, msg: &Message) -> Result<()> {
    let params: NewBufferParams = parse_params(msg.params.as_ref())?;
    let Some(announce_id) = msg.id.clone() else {
        return Err(ChannelError::invalid_usage("announce without id"));
    };

    match inner.begin_receive(&params.id, &announce_id)? {
        Admission::Started => {}
        Admission::Redelivered => {
            debug!(
                parent: inner.node.span(),
                "Ignoring repeated announce {} for buffer {}", announce_id, params.id
            );
            return Ok(());
        }
    }

    debug!(parent: inner.node.span(), "Peer announced buffer {}", params.id);
    tokio::spawn(receive::receive_announced(
        inner.clone(),
        announce_id,
        params.id,
    ));
    Ok(())
}

/// `gbi`: report the size of a buffer on offer.
fn buffer_info(inner: &ChannelerInner, msg: &Message) -> Result<Value> {
    let params: BufferInfoParams = parse_params(msg.params.as_ref())?;
    let (source, request_id) = inner.lookup(&params.buffid)?;
    let size = source.size()?;

    inner.keep_announce_alive(request_id.as_ref());
    trace!(parent: inner.node.span(), "Buffer {} is {} bytes", params.buffid, size);
    Ok(serde_json::to_value(BufferInfo { size })?)
}

/// `gbs`: serve `[start, end)` of a buffer on offer.
async fn buffer_slice(inner: &ChannelerInner, msg: &Message) -> Result<Value> {
    let params: SliceParams = parse_params(msg.params.as_ref())?;
    let (source, request_id) = inner.lookup(&params.buffid)?;
    let size = source.size()?;

    if params.start > params.end || params.end > size {
        return Err(ProtocolError::InvalidParams(format!(
            "range [{}, {}) outside buffer of {} bytes",
            params.start, params.end, size
        ))
        .into());
    }
    let len = params.end - params.start;
    let max = inner.config.max_slice_size as u64;
    if len > max {
        return Err(ProtocolError::InvalidParams(format!(
            "slice of {} bytes exceeds limit of {} bytes",
            len, max
        ))
        .into());
    }

    let bytes = read_source(source, params.start, params.end).await?;
    inner.keep_announce_alive(request_id.as_ref());
    trace!(
        parent: inner.node.span(),
        "Serving {} [{}, {})", params.buffid, params.start, params.end
    );
    Ok(serde_json::to_value(SliceData::encode(&bytes))?)
}

#[cfg(test)]
mod tests {
    use crate::channeler::Channeler;
    use crate::error::{ChannelError, ProtocolError};
    use crate::message::{codes, Message, MessageId};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Harness {
        channeler: Channeler,
        outbox: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, outbox) = mpsc::unbounded_channel();
            let channeler = Channeler::builder(Arc::new(tx)).build().unwrap();
            Self { channeler, outbox }
        }

        async fn next(&mut self) -> Message {
            Message::from_slice(&self.outbox.recv().await.unwrap()).unwrap()
        }

        async fn push(&self, msg: Message) -> crate::error::Result<()> {
            self.channeler
                .push_message_from_outside(&msg.to_vec().unwrap())
                .await
        }

        /// Start sending `data` and return the announced buffer id.
        async fn offer(&mut self, data: Vec<u8>) -> (String, MessageId) {
            let sender = self.channeler.clone();
            tokio::spawn(async move { sender.channel_data(data).await });
            let announce = self.next().await;
            let buffid = announce.params.unwrap()["id"].as_str().unwrap().to_string();
            (buffid, announce.id.unwrap())
        }
    }

    #[tokio::test]
    async fn test_serves_buffer_info_and_slices() {
        let mut h = Harness::new();
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let (buffid, _) = h.offer(data.clone()).await;

        h.push(Message::request("gbi", Some(json!({"buffid": buffid}))).with_id(1))
            .await
            .unwrap();
        let info = h.next().await;
        assert_eq!(info.id, Some(MessageId::Num(1)));
        assert_eq!(info.result, Some(json!({"s": 1000})));

        h.push(
            Message::request("gbs", Some(json!({"buffid": buffid, "start": 512, "end": 1000})))
                .with_id(2),
        )
        .await
        .unwrap();
        let slice = h.next().await;
        let decoded = crate::channeler::protocol::SliceData {
            data: slice.result.unwrap()["data"].as_str().unwrap().to_string(),
        }
        .decode()
        .unwrap();
        assert_eq!(decoded, &data[512..1000]);
    }

    #[tokio::test]
    async fn test_unknown_buffer_id() {
        let mut h = Harness::new();
        let err = h
            .push(Message::request("gbi", Some(json!({"buffid": "nope"}))).with_id(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidBufferId(_))
        ));

        let reply = h.next().await;
        assert_eq!(reply.error.unwrap().code, codes::INVALID_BUFFER_ID);
    }

    #[tokio::test]
    async fn test_slice_range_is_validated() {
        let mut h = Harness::new();
        let (buffid, _) = h.offer(vec![0u8; 2000]).await;

        for (start, end) in [(10, 5), (0, 2001), (0, 1024)] {
            let err = h
                .push(
                    Message::request(
                        "gbs",
                        Some(json!({"buffid": buffid, "start": start, "end": end})),
                    )
                    .with_id(7),
                )
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ChannelError::Protocol(ProtocolError::InvalidParams(_))
            ));
            assert_eq!(h.next().await.error.unwrap().code, codes::INVALID_PARAMS);
        }
    }

    #[tokio::test]
    async fn test_malformed_params_and_unknown_method() {
        let mut h = Harness::new();

        let err = h
            .push(Message::request("gbi", Some(json!({"id": 1}))).with_id(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidParams(_))
        ));
        assert_eq!(h.next().await.error.unwrap().code, codes::INVALID_PARAMS);

        let err = h
            .push(Message::request("frobnicate", None).with_id(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::MethodNotFound(_))
        ));
        assert_eq!(h.next().await.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_are_invalid_requests() {
        let h = Harness::new();
        let err = h
            .push(Message::notification("gbi", Some(json!({"buffid": "x"}))))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidRequest(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serving_keeps_announce_alive() {
        let mut h = Harness::new();
        let (buffid, announce_id) = h.offer(vec![1u8; 100]).await;

        // Announce timeout is 60 ticks; keep pulling past it.
        for i in 0..4i64 {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            h.push(Message::request("gbi", Some(json!({"buffid": buffid}))).with_id(i))
                .await
                .unwrap();
            h.next().await;
        }

        assert!(h.channeler.node().is_pending(&announce_id));
    }
}
