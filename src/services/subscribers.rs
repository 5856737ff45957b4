//! Local fan-out of realtime change events to in-process listeners.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::trace;

use crate::backend::{ChangeEvent, Table};

pub type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    table: Table,
    id: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<Table, Vec<(u64, Callback)>>,
}

#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<Registry>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, table: Table, callback: F) -> SubscriptionToken
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(table)
            .or_default()
            .push((id, Arc::new(callback)));
        SubscriptionToken { table, id }
    }

    /// Returns `false` if the token was already unsubscribed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut registry = self.registry();
        let Some(handlers) = registry.handlers.get_mut(&token.table) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != token.id);
        before != handlers.len()
    }

    // Callbacks run outside the lock so they may subscribe or unsubscribe.
    pub fn notify(&self, event: &ChangeEvent) {
        let callbacks: Vec<Callback> = self
            .registry()
            .handlers
            .get(&event.table)
            .map(|handlers| handlers.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        trace!(table = %event.table, listeners = callbacks.len(), "notifying subscribers");
        for callback in callbacks {
            callback(event);
        }
    }
}
