use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::Cse;

/// Queue behind a `<pollingChannel>`: notifications destined for an AE that
/// has no point of access are parked here until the AE polls `pcu`.
pub(crate) struct PollingChannel {
    queue: std::sync::Mutex<VecDeque<Value>>,
    signal: Notify,
}

impl PollingChannel {
    pub(crate) fn new() -> Self {
        Self {
            queue: std::sync::Mutex::new(VecDeque::new()),
            signal: Notify::new(),
        }
    }
}

impl Cse {
    /// Register a channel for the polling channel's parent (the AE).
    pub(crate) fn polling_register(&self, owner_ri: &str) {
        self.inner
            .polling
            .insert(owner_ri.to_string(), Arc::new(PollingChannel::new()));
    }

    pub(crate) fn polling_unregister(&self, owner_ri: &str) {
        self.inner.polling.remove(owner_ri);
    }

    /// Enqueue a primitive for a polling AE. Returns false when no channel
    /// is registered for the owner.
    pub(crate) fn polling_enqueue(&self, owner_ri: &str, item: Value) -> bool {
        match self.inner.polling.get(owner_ri) {
            Some(channel) => {
                channel
                    .queue
                    .lock()
                    .expect("polling queue lock poisoned")
                    .push_back(item);
                channel.signal.notify_one();
                true
            }
            None => false,
        }
    }

    /// Long-poll the channel: returns the oldest queued primitive, waiting up
    /// to `timeout` for one to arrive.
    pub(crate) async fn polling_poll(&self, owner_ri: &str, timeout: Duration) -> Option<Value> {
        let channel = match self.inner.polling.get(owner_ri) {
            Some(entry) => entry.value().clone(),
            None => return None,
        };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = channel
                .queue
                .lock()
                .expect("polling queue lock poisoned")
                .pop_front()
            {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, channel.signal.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }
}
