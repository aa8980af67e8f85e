//! Connection registry backed by a pool of reusable records
//!
//! Active records live in a `DashMap` keyed by connection id. Released
//! records are reset and parked on a bounded lock-free queue so their
//! buffers can be reused by the next connection.

use crossbeam::queue::ArrayQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use smartc_core::{ConnectionId, Error, Result, SessionId};
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::wire::ServerEvent;

/// Sending half of a connection's outbound queue
pub type Outbound = mpsc::Sender<ServerEvent>;

pub type SharedRecord = Arc<Mutex<ConnectionRecord>>;

/// Per-connection state. Either free (parked in the pool, all fields reset)
/// or active (registered under its id).
#[derive(Debug)]
pub struct ConnectionRecord {
    id: Option<ConnectionId>,
    pub session_id: Option<SessionId>,
    pub username: String,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub relay_eligible: bool,
    pub relay_active: bool,
    outbound: Option<Outbound>,
    /// Cancelled when the record leaves the registry
    closed: CancellationToken,
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            id: None,
            session_id: None,
            username: String::new(),
            connected_at: now,
            last_activity: now,
            relay_eligible: false,
            relay_active: false,
            outbound: None,
            closed: CancellationToken::new(),
        }
    }
}

impl ConnectionRecord {
    fn activate(&mut self, id: ConnectionId, outbound: Outbound) {
        let now = Instant::now();
        self.id = Some(id);
        self.connected_at = now;
        self.last_activity = now;
        self.outbound = Some(outbound);
        self.closed = CancellationToken::new();
    }

    fn reset(&mut self) {
        self.closed.cancel();
        self.id = None;
        self.session_id = None;
        self.username.clear();
        self.relay_eligible = false;
        self.relay_active = false;
        self.outbound = None;
    }

    #[must_use]
    pub const fn id(&self) -> Option<&ConnectionId> {
        self.id.as_ref()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    #[must_use]
    pub fn outbound(&self) -> Option<&Outbound> {
        self.outbound.as_ref()
    }

    /// Signal that fires once this connection is unregistered, whether by
    /// the transport, an idle sweep or hub shutdown
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Approximate heap and inline bytes held by this record
    #[must_use]
    pub fn footprint(&self) -> usize {
        mem::size_of::<Self>()
            + self.id.as_ref().map_or(0, |id| id.as_str().len())
            + self.session_id.as_ref().map_or(0, |id| id.as_str().len())
            + self.username.capacity()
    }
}

/// What a connection held when it left the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedRecord {
    pub session_id: Option<SessionId>,
    pub username: String,
    pub connected_for: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub available: usize,
    pub memory_usage_bytes: usize,
    pub total_acquired: u64,
}

pub struct ConnectionPool {
    active: DashMap<ConnectionId, SharedRecord>,
    free: ArrayQueue<ConnectionRecord>,
    /// Reserved or committed slots, checked against `max_active`
    reserved: AtomicUsize,
    total_acquired: AtomicU64,
    /// 0 = unlimited
    max_active: usize,
}

impl ConnectionPool {
    /// `capacity` bounds the free list, `max_active` bounds live connections (0 = unlimited)
    pub fn new(capacity: usize, max_active: usize) -> Self {
        Self {
            active: DashMap::new(),
            free: ArrayQueue::new(capacity.max(1)),
            reserved: AtomicUsize::new(0),
            total_acquired: AtomicU64::new(0),
            max_active,
        }
    }

    /// Take a record for `id`, reusing a free one when available.
    ///
    /// The returned guard puts the record back on the free list unless it is
    /// committed into the registry.
    pub fn acquire(&self, id: ConnectionId, outbound: Outbound) -> Result<PooledConnection<'_>> {
        let reserved = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (self.max_active == 0 || n < self.max_active).then_some(n + 1)
            });
        if reserved.is_err() {
            warn!(
                connection_id = %id,
                max_connections = self.max_active,
                "Connection limit reached"
            );
            return Err(Error::ResourceExhausted(format!(
                "Server at capacity ({} connections)",
                self.max_active
            )));
        }

        let mut record = self.free.pop().unwrap_or_default();
        record.activate(id, outbound);
        Ok(PooledConnection {
            pool: self,
            record: Some(record),
        })
    }

    fn park(&self, mut record: ConnectionRecord) {
        record.reset();
        // full free list: let the record drop
        let _ = self.free.push(record);
    }

    /// Remove `id` from the registry and return its record to the free list.
    ///
    /// The session and username are read after the id is unregistered, so a
    /// concurrent join either sees the id gone or has already stored its
    /// session here.
    pub fn release(&self, id: &ConnectionId) -> Option<ReleasedRecord> {
        let (_, shared) = self.active.remove(id)?;
        self.reserved.fetch_sub(1, Ordering::AcqRel);

        let released = {
            let record = shared.lock();
            ReleasedRecord {
                session_id: record.session_id.clone(),
                username: record.username.clone(),
                connected_for: record.connected_at.elapsed(),
            }
        };

        match Arc::try_unwrap(shared) {
            Ok(record) => self.park(record.into_inner()),
            // still referenced by an in-flight operation; it is dropped when that finishes
            Err(shared) => shared.lock().reset(),
        }
        debug!(connection_id = %id, "Connection record released");
        Some(released)
    }

    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<SharedRecord> {
        self.active.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Close signal for `id`. Unknown ids get an already cancelled token.
    #[must_use]
    pub fn closed(&self, id: &ConnectionId) -> CancellationToken {
        self.get(id).map_or_else(
            || {
                let token = CancellationToken::new();
                token.cancel();
                token
            },
            |record| record.lock().closed(),
        )
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.active.contains_key(id)
    }

    /// Refresh last activity. Returns false for unknown ids.
    pub fn touch(&self, id: &ConnectionId) -> bool {
        self.get(id).map(|record| record.lock().touch()).is_some()
    }

    /// Queue an event for a connection without waiting.
    ///
    /// Delivery is best effort: unknown ids, full queues and closed
    /// connections are logged and reported as `false`.
    pub fn send(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        let Some(outbound) = self.get(id).and_then(|r| r.lock().outbound().cloned()) else {
            debug!(connection_id = %id, "Delivery target not registered");
            return false;
        };
        match outbound.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    connection_id = %id,
                    event_type = event.event_type(),
                    "Outbound queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    connection_id = %id,
                    event_type = event.event_type(),
                    "Outbound queue closed, dropping event"
                );
                false
            }
        }
    }

    /// Ids whose last activity is older than `timeout`
    #[must_use]
    pub fn idle_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.active
            .iter()
            .filter(|entry| entry.value().lock().idle_duration() > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let active_bytes: usize = self
            .active
            .iter()
            .map(|entry| entry.value().lock().footprint())
            .sum();
        let available = self.free.len();
        PoolStats {
            active: self.active.len(),
            available,
            memory_usage_bytes: active_bytes + available * mem::size_of::<ConnectionRecord>(),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
        }
    }

    /// Drop every active record and empty the free list
    pub fn drain(&self) -> usize {
        let ids = self.active_ids();
        let count = ids.iter().filter(|id| self.release(id).is_some()).count();
        while self.free.pop().is_some() {}
        info!(released = count, "Connection pool drained");
        count
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("active", &self.active.len())
            .field("available", &self.free.len())
            .field("max_active", &self.max_active)
            .finish()
    }
}

/// A record taken from the pool but not yet registered.
///
/// Dropping the guard returns the record and its capacity slot.
#[derive(Debug)]
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    record: Option<ConnectionRecord>,
}

impl PooledConnection<'_> {
    /// Register the record under its id
    pub fn commit(mut self) -> Result<SharedRecord> {
        let record = self
            .record
            .take()
            .ok_or_else(|| Error::InvariantViolation("pooled record already taken".into()))?;
        let Some(id) = record.id.clone() else {
            self.record = Some(record);
            return Err(Error::InvariantViolation("pooled record has no id".into()));
        };

        match self.pool.active.entry(id) {
            Entry::Occupied(entry) => {
                let message = format!("Connection {} already registered", entry.key());
                drop(entry);
                self.record = Some(record);
                Err(Error::AlreadyExists(message))
            }
            Entry::Vacant(entry) => {
                let shared = Arc::new(Mutex::new(record));
                entry.insert(Arc::clone(&shared));
                self.pool.total_acquired.fetch_add(1, Ordering::Relaxed);
                Ok(shared)
            }
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            self.pool.reserved.fetch_sub(1, Ordering::AcqRel);
            self.pool.park(record);
        }
    }
}
