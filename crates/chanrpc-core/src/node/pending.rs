//! Pending-call table.
//!
//! Always accessed under the node's pending lock. Methods here never invoke
//! handlers; they hand expired or drained calls back to the caller, which
//! dispatches after releasing the lock.

use super::handler::ResponseHandler;
use crate::message::MessageId;
use std::collections::HashMap;
use uuid::Uuid;

/// One outstanding request awaiting a reply.
pub(crate) struct PendingCall {
    pub handler: Box<dyn ResponseHandler>,
    pub remaining_ticks: u64,
    pub original_ticks: u64,
}

impl PendingCall {
    pub fn new(handler: Box<dyn ResponseHandler>, ticks: u64) -> Self {
        Self {
            handler,
            remaining_ticks: ticks,
            original_ticks: ticks,
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingTable {
    pub calls: HashMap<MessageId, PendingCall>,
    pub closed: bool,
}

impl PendingTable {
    /// Draw random ids until one is not pending.
    pub fn unique_id(&self) -> MessageId {
        loop {
            let id = MessageId::Str(Uuid::new_v4().to_string());
            if !self.calls.contains_key(&id) {
                return id;
            }
        }
    }

    /// Advance every countdown by one tick and remove the calls that ran out.
    pub fn expire_tick(&mut self) -> Vec<(MessageId, PendingCall)> {
        let mut expired_ids = Vec::new();
        for (id, call) in self.calls.iter_mut() {
            call.remaining_ticks = call.remaining_ticks.saturating_sub(1);
            if call.remaining_ticks == 0 {
                expired_ids.push(id.clone());
            }
        }

        expired_ids
            .into_iter()
            .filter_map(|id| self.calls.remove_entry(&id))
            .collect()
    }

    /// Re-arm a countdown, optionally replacing the original timeout.
    pub fn reset(&mut self, id: &MessageId, new_ticks: Option<u64>) -> bool {
        match self.calls.get_mut(id) {
            Some(call) => {
                if let Some(ticks) = new_ticks {
                    call.original_ticks = ticks;
                }
                call.remaining_ticks = call.original_ticks;
                true
            }
            None => false,
        }
    }

    /// Mark closed and take every remaining call.
    pub fn close(&mut self) -> Vec<(MessageId, PendingCall)> {
        self.closed = true;
        self.calls.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::handler::{CallOutcome, FnResponseHandler};

    fn noop() -> Box<dyn ResponseHandler> {
        Box::new(FnResponseHandler(|_: CallOutcome| {}))
    }

    #[test]
    fn test_expire_after_configured_ticks() {
        let mut table = PendingTable::default();
        table.calls.insert(MessageId::Num(1), PendingCall::new(noop(), 0));
        table.calls.insert(MessageId::Num(2), PendingCall::new(noop(), 3));

        let expired = table.expire_tick();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, MessageId::Num(1));

        assert!(table.expire_tick().is_empty());
        let expired = table.expire_tick();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, MessageId::Num(2));
        assert!(table.calls.is_empty());
    }

    #[test]
    fn test_reset_rearms_countdown() {
        let mut table = PendingTable::default();
        let id = MessageId::Str("a".into());
        table.calls.insert(id.clone(), PendingCall::new(noop(), 2));

        table.expire_tick();
        assert_eq!(table.calls[&id].remaining_ticks, 1);
        assert!(table.reset(&id, None));
        assert_eq!(table.calls[&id].remaining_ticks, 2);

        assert!(table.reset(&id, Some(5)));
        assert_eq!(table.calls[&id].remaining_ticks, 5);
        assert_eq!(table.calls[&id].original_ticks, 5);

        assert!(!table.reset(&MessageId::Num(9), None));
    }

    #[test]
    fn test_unique_id_avoids_pending() {
        let mut table = PendingTable::default();
        for _ in 0..100 {
            let id = table.unique_id();
            assert!(!table.calls.contains_key(&id));
            table.calls.insert(id, PendingCall::new(noop(), 1));
        }
        assert_eq!(table.calls.len(), 100);
    }

    #[test]
    fn test_close_drains() {
        let mut table = PendingTable::default();
        table.calls.insert(MessageId::Num(1), PendingCall::new(noop(), 1));
        let drained = table.close();
        assert_eq!(drained.len(), 1);
        assert!(table.closed);
        assert!(table.calls.is_empty());
    }
}
