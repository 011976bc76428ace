use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Agents,
    Bounties,
    CreditTransactions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change pushed to subscribers. `record` is the row as JSON;
/// for deletes it only carries the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

/// Per-table fan-out of change events. Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    subscribers: Arc<Mutex<Vec<(Table, Sender<ChangeEvent>)>>>,
}

impl ChangeFeed {
    pub fn subscribe(&self, table: Table) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers().push((table, tx));
        rx
    }

    pub fn publish(&self, event: ChangeEvent) {
        // a failed send means the receiver is gone
        self.subscribers()
            .retain(|(table, tx)| *table != event.table || tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Recovers a poisoned lock; every update is a single push or retain.
    fn subscribers(&self) -> MutexGuard<'_, Vec<(Table, Sender<ChangeEvent>)>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("change feed lock poisoned; recovering subscriber list");
            poisoned.into_inner()
        })
    }
}
