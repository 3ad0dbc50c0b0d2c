//! Pulling an announced buffer from the peer.

use super::protocol::{
    parse_result, BufferInfo, BufferInfoParams, SliceData, SliceParams, METHOD_GET_BUFFER_INFO,
    METHOD_GET_BUFFER_SLICE,
};
use super::slicing::slice_ranges;
use super::ChannelerInner;
use crate::error::{ChannelError, ProtocolError, Result};
use crate::message::{codes, Message, MessageId};
use crate::node::dispatch;
use crate::retry::retry_async;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of admitting an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Admission {
    /// A new pull should start.
    Started,
    /// The same announce arrived again while its pull is running.
    Redelivered,
}

/// Buffers this side is pulling, keyed to the announce that started each.
#[derive(Default)]
pub(crate) struct ReceiveTable {
    active: HashMap<String, MessageId>,
}

impl ReceiveTable {
    /// Admit a pull of `buffer_id`, keeping at most one per id and at most
    /// `limit` overall.
    pub(super) fn admit(
        &mut self,
        buffer_id: &str,
        announce_id: &MessageId,
        limit: usize,
    ) -> Result<Admission> {
        match self.active.get(buffer_id) {
            Some(running) if running == announce_id => return Ok(Admission::Redelivered),
            Some(_) => {
                return Err(ProtocolError::TransferInProgress(buffer_id.to_string()).into())
            }
            None => {}
        }
        if self.active.len() >= limit {
            return Err(ChannelError::Busy { limit });
        }
        self.active.insert(buffer_id.to_string(), announce_id.clone());
        Ok(Admission::Started)
    }

    pub(super) fn finish(&mut self, buffer_id: &str) {
        self.active.remove(buffer_id);
    }

    pub(super) fn len(&self) -> usize {
        self.active.len()
    }

    pub(super) fn clear(&mut self) {
        self.active.clear();
    }
}

/// Pull `buffer_id`, deliver it, then answer the announce `announce_id`.
pub(super) async fn receive_announced(
    inner: Arc<ChannelerInner>,
    announce_id: MessageId,
    buffer_id: String,
) {
    let span = inner.node.span().clone();

    let pulled = pull_buffer(&inner, &buffer_id).await;
    inner.finish_receive(&buffer_id);

    match pulled {
        Ok(data) => {
            info!(parent: &span, "Received buffer {} ({} bytes)", buffer_id, data.len());
            if let Some(cb) = inner.on_data.clone() {
                dispatch(move || cb(data));
            }
            let ack = Message::response(announce_id, Value::Bool(true));
            if let Err(e) = inner.node.send_response(&ack).await {
                warn!(parent: &span, "Failed to acknowledge buffer {}: {}", buffer_id, e);
            }
        }
        Err(ChannelError::Closed) => {
            debug!(parent: &span, "Abandoned buffer {}: closed", buffer_id);
        }
        Err(e) => {
            warn!(parent: &span, "Failed to pull buffer {}: {}", buffer_id, e);
            let code = match e.as_protocol_error() {
                Some(pe) => {
                    inner.report_protocol_error(pe);
                    codes::PROTOCOL_ERROR
                }
                None => codes::INTERNAL_ERROR,
            };
            if let Err(send_err) = inner.node.reply_error(announce_id, code, e.to_string()).await {
                debug!(parent: &span, "Could not report failure to peer: {}", send_err);
            }
        }
    }
}

/// Query the size, then pull every slice in order. Nothing partial is
/// returned.
async fn pull_buffer(inner: &ChannelerInner, buffer_id: &str) -> Result<Vec<u8>> {
    let info: BufferInfo = query(
        inner,
        METHOD_GET_BUFFER_INFO,
        &BufferInfoParams {
            buffid: buffer_id.to_string(),
        },
    )
    .await?;

    let limit = inner.config.max_buffer_size;
    let too_large = || ProtocolError::BufferTooLarge {
        size: info.size,
        limit,
    };
    if info.size > limit {
        return Err(too_large().into());
    }
    let len = usize::try_from(info.size).map_err(|_| too_large())?;
    debug!(parent: inner.node.span(), "Pulling buffer {} ({} bytes)", buffer_id, len);

    let mut buffer = vec![0u8; len];
    for range in slice_ranges(info.size, inner.config.slice_size as u64) {
        let slice: SliceData = query(
            inner,
            METHOD_GET_BUFFER_SLICE,
            &SliceParams {
                buffid: buffer_id.to_string(),
                start: range.start,
                end: range.end,
            },
        )
        .await?;

        let bytes = slice.decode()?;
        let (start, end) = (range.start as usize, range.end as usize);
        if bytes.len() != end - start {
            return Err(ProtocolError::SliceLengthMismatch {
                expected: end - start,
                actual: bytes.len(),
            }
            .into());
        }
        buffer[start..end].copy_from_slice(&bytes);
    }

    Ok(buffer)
}

/// One channeler query, retried on timeout only.
async fn query<P, T>(inner: &ChannelerInner, method: &str, params: &P) -> Result<T>
where
    P: Serialize,
    T: DeserializeOwned,
{
    let params = &serde_json::to_value(params)?;
    let node = &inner.node;
    let timeout = inner.config.call_timeout;

    let (result, stats) = retry_async(
        &inner.config.retry,
        move || node.call(Message::request(method, Some(params.clone())), timeout),
        ChannelError::is_retryable,
    )
    .await;

    if stats.attempts > 1 {
        debug!(
            parent: node.span(),
            "{} finished after {} attempts (success: {}, waited {:?})",
            method,
            stats.attempts,
            stats.success,
            stats.total_delay
        );
    }

    let response = result?;
    if let Some(error) = response.error {
        return Err(ChannelError::from_peer_error(error));
    }
    Ok(parse_result(response.result.as_ref())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_pull_per_buffer_id() {
        let mut table = ReceiveTable::default();
        let first = MessageId::from("a1");

        assert_eq!(table.admit("buf", &first, 4).unwrap(), Admission::Started);
        assert_eq!(
            table.admit("buf", &first, 4).unwrap(),
            Admission::Redelivered
        );
        assert!(matches!(
            table.admit("buf", &MessageId::from("a2"), 4),
            Err(ChannelError::Protocol(ProtocolError::TransferInProgress(id))) if id == "buf"
        ));
        assert_eq!(table.len(), 1);

        table.finish("buf");
        assert_eq!(
            table.admit("buf", &MessageId::from("a2"), 4).unwrap(),
            Admission::Started
        );
    }

    #[test]
    fn test_concurrent_pulls_are_capped() {
        let mut table = ReceiveTable::default();
        for i in 0..2i64 {
            table
                .admit(&format!("b{}", i), &MessageId::Num(i), 2)
                .unwrap();
        }
        assert!(matches!(
            table.admit("b2", &MessageId::Num(2), 2),
            Err(ChannelError::Busy { limit: 2 })
        ));

        table.finish("b0");
        assert!(table.admit("b2", &MessageId::Num(2), 2).is_ok());

        table.clear();
        assert_eq!(table.len(), 0);
    }
}
