//! Periodic timeout sweep.

use super::{dispatch, NodeInner};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub(crate) struct SweepHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn spawn(node: Weak<NodeInner>, tick: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(node, tick, stop_rx));
        Self { stop_tx, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// One tick per `tick`; exits on stop, on close, or once the node is gone.
async fn run(node: Weak<NodeInner>, tick: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut interval = interval_at(Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop_rx.changed() => break,
        }

        let Some(inner) = node.upgrade() else {
            break;
        };

        let (expired, closed) = {
            let mut table = inner.lock_pending();
            if table.closed {
                (Vec::new(), true)
            } else {
                (table.expire_tick(), false)
            }
        };
        if closed {
            break;
        }

        for (id, call) in expired {
            debug!(parent: &inner.span, "Call {} timed out", id);
            dispatch(move || call.handler.on_timeout());
        }
    }

    if let Some(inner) = node.upgrade() {
        debug!(parent: &inner.span, "Timeout sweep stopped");
    }
}
