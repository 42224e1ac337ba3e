use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use ocse_core::{CseError, Operation};

/// Process-wide counters, persisted periodically by the statistics worker.
#[derive(Default)]
pub struct Statistics {
    pub created: AtomicU64,
    pub updated: AtomicU64,
    pub deleted: AtomicU64,
    pub expired: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_dropped: AtomicU64,
    pub forwarded: AtomicU64,
    pub errors: AtomicU64,
    creates: AtomicU64,
    retrieves: AtomicU64,
    updates_op: AtomicU64,
    deletes_op: AtomicU64,
    notifies: AtomicU64,
    discoveries: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_request(&self, op: Operation) {
        let counter = match op {
            Operation::Create => &self.creates,
            Operation::Retrieve => &self.retrieves,
            Operation::Update => &self.updates_op,
            Operation::Delete => &self.deletes_op,
            Operation::Notify => &self.notifies,
            Operation::Discovery => &self.discoveries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "ctRes": self.created.load(Ordering::Relaxed),
            "upRes": self.updated.load(Ordering::Relaxed),
            "rmRes": self.deleted.load(Ordering::Relaxed),
            "exRes": self.expired.load(Ordering::Relaxed),
            "notifs": self.notifications_sent.load(Ordering::Relaxed),
            "notifsDropped": self.notifications_dropped.load(Ordering::Relaxed),
            "fwd": self.forwarded.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
            "req": {
                "cr": self.creates.load(Ordering::Relaxed),
                "rt": self.retrieves.load(Ordering::Relaxed),
                "up": self.updates_op.load(Ordering::Relaxed),
                "rm": self.deletes_op.load(Ordering::Relaxed),
                "nt": self.notifies.load(Ordering::Relaxed),
                "ds": self.discoveries.load(Ordering::Relaxed),
            },
        })
    }

    /// Restore counters from a persisted snapshot (best effort).
    pub fn restore(&self, snapshot: &Value) -> Result<(), CseError> {
        let load = |key: &str| snapshot.get(key).and_then(Value::as_u64).unwrap_or(0);
        self.created.store(load("ctRes"), Ordering::Relaxed);
        self.updated.store(load("upRes"), Ordering::Relaxed);
        self.deleted.store(load("rmRes"), Ordering::Relaxed);
        self.expired.store(load("exRes"), Ordering::Relaxed);
        self.notifications_sent.store(load("notifs"), Ordering::Relaxed);
        self.notifications_dropped
            .store(load("notifsDropped"), Ordering::Relaxed);
        self.forwarded.store(load("fwd"), Ordering::Relaxed);
        self.errors.store(load("errors"), Ordering::Relaxed);
        if let Some(req) = snapshot.get("req") {
            let load = |key: &str| req.get(key).and_then(Value::as_u64).unwrap_or(0);
            self.creates.store(load("cr"), Ordering::Relaxed);
            self.retrieves.store(load("rt"), Ordering::Relaxed);
            self.updates_op.store(load("up"), Ordering::Relaxed);
            self.deletes_op.store(load("rm"), Ordering::Relaxed);
            self.notifies.store(load("nt"), Ordering::Relaxed);
            self.discoveries.store(load("ds"), Ordering::Relaxed);
        }
        Ok(())
    }
}
