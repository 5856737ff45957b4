use std::{collections::HashMap, fmt, sync::Arc};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Trips,
    TripMembers,
    TripExpenses,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Trips, Table::TripMembers, Table::TripExpenses];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Trips => "trips",
            Table::TripMembers => "trip_members",
            Table::TripExpenses => "trip_expenses",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A row change. For `trip_members` the record id is the member's user id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
    pub record_id: Uuid,
    pub trip_id: Uuid,
}

/// In-process stand-in for the realtime service: one broadcast channel per table.
#[derive(Clone)]
pub struct Realtime {
    senders: Arc<HashMap<Table, broadcast::Sender<ChangeEvent>>>,
}

impl Default for Realtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Realtime {
    pub fn new() -> Self {
        let senders = Table::ALL
            .into_iter()
            .map(|table| (table, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();
        Self {
            senders: Arc::new(senders),
        }
    }

    pub fn channel(&self, table: Table) -> Channel {
        Channel {
            table,
            sender: self.senders[&table].clone(),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is listening to that table yet.
        let delivered = self.senders[&event.table].send(event.clone()).unwrap_or(0);
        trace!(table = %event.table, op = ?event.op, delivered, "realtime change published");
    }
}

pub struct Channel {
    table: Table,
    sender: broadcast::Sender<ChangeEvent>,
}

impl Channel {
    pub fn table(&self) -> Table {
        self.table
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}
