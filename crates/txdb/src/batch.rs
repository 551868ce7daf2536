//! Pre-commit accumulation of add and remove intents.
//!
//! A [`Batch`] records intents in arrival order and collapses them to one net
//! action per transaction id before anything reaches the engine:
//!
//! | sequence          | net action | observer fires |
//! |-------------------|------------|----------------|
//! | `add; add`        | add (last bytes) | once     |
//! | `add; remove`     | remove     | no             |
//! | `remove; add`     | add        | once           |
//! | `remove; remove`  | remove     | no             |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::{TxData, TxId, TxRecord};

/// Notification sink invoked once a transaction is durably on disk.
///
/// A panic in [`on_committed`](Self::on_committed) is caught and logged; the
/// commit it belongs to stands.
pub trait CommitObserver: Send + Sync {
    /// Called after the batch holding `id` committed with this intent's payload.
    fn on_committed(&self, id: &TxId);
}

impl<F> CommitObserver for F
where
    F: Fn(&TxId) + Send + Sync,
{
    fn on_committed(&self, id: &TxId) {
        self(id)
    }
}

/// What a resolved intent does to its id.
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Add { bytes: Bytes, size: u64 },
    Remove { size: u64 },
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { size, .. } => f.debug_struct("Add").field("size", size).finish(),
            Self::Remove { size } => f.debug_struct("Remove").field("size", size).finish(),
        }
    }
}

/// One intent for one id.
#[derive(Clone)]
pub(crate) struct Intent {
    pub(crate) id: TxId,
    pub(crate) action: Action,
    pub(crate) observer: Option<Arc<dyn CommitObserver>>,
}

impl fmt::Debug for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intent")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Intent {
    /// Fold a later intent for the same id into this one.
    fn merge(&mut self, later: Intent) {
        match (&self.action, later.action) {
            (Action::Add { .. }, Action::Add { bytes, size }) => {
                self.action = Action::Add { bytes, size };
                // Exactly one observer survives: the latest one registered.
                if later.observer.is_some() {
                    self.observer = later.observer;
                }
            }
            (_, action) => {
                self.action = action;
                self.observer = later.observer;
            }
        }
    }
}

/// Accumulator of add and remove intents committed as one atomic write.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    intents: Vec<Intent>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` intents.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            intents: Vec::with_capacity(capacity),
        }
    }

    /// Queue a write of `record`.
    ///
    /// `observer` fires after commit, unless a later intent in this batch
    /// supersedes this one.
    pub fn add(
        &mut self,
        record: TxRecord,
        observer: Option<Arc<dyn CommitObserver>>,
    ) -> &mut Self {
        self.intents.push(Intent {
            id: record.id,
            action: Action::Add {
                bytes: record.bytes,
                size: record.size,
            },
            observer,
        });
        self
    }

    /// Queue a removal. Removing an id that is not stored is a no-op.
    pub fn remove(&mut self, txdata: TxData) -> &mut Self {
        self.intents.push(Intent {
            id: txdata.id,
            action: Action::Remove { size: txdata.size },
            observer: None,
        });
        self
    }

    /// Number of intents queued, before merging.
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Drop all queued intents.
    pub fn clear(&mut self) {
        self.intents.clear();
    }

    /// Collapse the intents to one per id, ordered by each id's first arrival.
    pub(crate) fn resolve(&self) -> Vec<Intent> {
        let mut slots: HashMap<TxId, usize> = HashMap::with_capacity(self.intents.len());
        let mut resolved: Vec<Intent> = Vec::with_capacity(self.intents.len());

        for intent in &self.intents {
            match slots.get(&intent.id).and_then(|&slot| resolved.get_mut(slot)) {
                Some(existing) => existing.merge(intent.clone()),
                None => {
                    slots.insert(intent.id, resolved.len());
                    resolved.push(intent.clone());
                }
            }
        }
        resolved
    }
}
