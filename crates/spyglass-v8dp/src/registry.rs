//! Reference-counted connection registry.
//!
//! Sessions that target the same debug port share one physical
//! [`Connection`]. Each session holds a [`ConnectionLease`]; the socket is
//! closed when the last lease for its address is dropped. Concurrent first
//! callers share a single in-flight connect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;

use crate::connection::Connection;
use crate::error::V8Error;

type Key = (String, u16);

/// One address's shared connect attempt.
pub struct ConnectionSlot {
    host: String,
    port: u16,
    cell: OnceCell<Result<Connection, String>>,
}

impl ConnectionSlot {
    fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            cell: OnceCell::new(),
        }
    }

    async fn connect(&self) -> Result<Connection, V8Error> {
        let result = self
            .cell
            .get_or_init(|| async {
                Connection::connect(&self.host, self.port)
                    .await
                    .map_err(|e| match e {
                        V8Error::Disconnected(reason) => reason,
                        other => other.to_string(),
                    })
            })
            .await;
        result.clone().map_err(V8Error::Disconnected)
    }

    /// Whether this slot can no longer produce a live connection.
    fn is_dead(&self) -> bool {
        match self.cell.get() {
            None => false,
            Some(Ok(conn)) => !conn.is_connected(),
            Some(Err(_)) => true,
        }
    }

    fn close(&self) {
        if let Some(Ok(conn)) = self.cell.get() {
            conn.close();
        }
    }
}

struct SlotEntry {
    slot: Arc<ConnectionSlot>,
    leases: usize,
}

/// Port → shared connection map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    slots: Arc<Mutex<HashMap<Key, SlotEntry>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, SlotEntry>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Take a lease on the connection to `host:port`.
    ///
    /// Does not connect; the first [`ConnectionLease::connection`] call does.
    /// A dead connection is replaced by a fresh slot for new leases.
    pub fn acquire(&self, host: &str, port: u16) -> ConnectionLease {
        let key = (host.to_string(), port);
        let mut slots = self.lock();
        let entry = slots.entry(key.clone()).or_insert_with(|| SlotEntry {
            slot: Arc::new(ConnectionSlot::new(host, port)),
            leases: 0,
        });
        if entry.slot.is_dead() {
            tracing::debug!(host, port, "replacing dead debuggee connection");
            entry.slot = Arc::new(ConnectionSlot::new(host, port));
            entry.leases = 0;
        }
        entry.leases += 1;
        ConnectionLease {
            registry: self.clone(),
            key,
            slot: entry.slot.clone(),
        }
    }

    /// Number of live leases on `host:port`.
    pub fn lease_count(&self, host: &str, port: u16) -> usize {
        self.lock()
            .get(&(host.to_string(), port))
            .map_or(0, |entry| entry.leases)
    }

    fn release(&self, key: &Key, slot: &Arc<ConnectionSlot>) {
        let mut slots = self.lock();
        let Some(entry) = slots.get_mut(key) else {
            return;
        };
        if !Arc::ptr_eq(&entry.slot, slot) {
            return;
        }
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases == 0 {
            if let Some(entry) = slots.remove(key) {
                entry.slot.close();
            }
        }
    }
}

/// A session's claim on a shared connection.
pub struct ConnectionLease {
    registry: ConnectionRegistry,
    key: Key,
    slot: Arc<ConnectionSlot>,
}

impl ConnectionLease {
    /// Connect on first use, or return the shared connection.
    ///
    /// # Errors
    ///
    /// Returns `V8Error::Disconnected` with the cached connect failure.
    pub async fn connection(&self) -> Result<Connection, V8Error> {
        self.slot.connect().await
    }

    /// Debuggee host.
    pub fn host(&self) -> &str {
        &self.key.0
    }

    /// Debug port.
    pub fn port(&self) -> u16 {
        self.key.1
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.registry.release(&self.key, &self.slot);
    }
}
