//! Session directory
//!
//! Membership of each session is a concurrent set paired with an atomic
//! counter. Creation and destruction of a session record happen under the
//! directory's map entry, so a join never lands in a record that is being
//! removed.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::Serialize;
use smartc_core::{ConnectionId, Error, Result, SessionId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct SessionRecord {
    id: SessionId,
    members: DashSet<ConnectionId>,
    member_count: AtomicUsize,
    /// Always a subset of `members`
    relay_nodes: RwLock<Vec<ConnectionId>>,
}

impl SessionRecord {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            members: DashSet::new(),
            member_count: AtomicUsize::new(0),
            relay_nodes: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.member_count() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.iter().map(|id| id.key().clone()).collect()
    }

    #[must_use]
    pub fn relay_nodes(&self) -> Vec<ConnectionId> {
        self.relay_nodes.read().clone()
    }

    fn insert(&self, id: ConnectionId) -> bool {
        let inserted = self.members.insert(id);
        if inserted {
            self.member_count.fetch_add(1, Ordering::AcqRel);
        }
        inserted
    }

    fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.members.remove(id).is_some();
        if removed {
            self.member_count.fetch_sub(1, Ordering::AcqRel);
            self.relay_nodes.write().retain(|relay| relay != id);
        }
        removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub created: bool,
    /// The connection was already a member
    pub rejoined: bool,
    pub member_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub remaining: usize,
    pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub connection_count: usize,
    pub relay_node_count: usize,
}

#[derive(Debug)]
pub struct SessionDirectory {
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    /// Tracked separately: `DashMap::len` would deadlock under an entry guard
    session_count: AtomicUsize,
    /// 0 = unlimited
    max_sessions: usize,
    /// 0 = unlimited
    max_members: usize,
}

impl SessionDirectory {
    pub fn new(max_sessions: usize, max_members: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            session_count: AtomicUsize::new(0),
            max_sessions,
            max_members,
        }
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionRecord>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Add `connection` to `session`, creating the session if needed
    pub fn join(&self, session: &SessionId, connection: &ConnectionId) -> Result<JoinOutcome> {
        match self.sessions.entry(session.clone()) {
            Entry::Occupied(entry) => {
                let record = entry.get();
                if record.contains(connection) {
                    return Ok(JoinOutcome {
                        created: false,
                        rejoined: true,
                        member_count: record.member_count(),
                    });
                }
                if self.max_members > 0 && record.member_count() >= self.max_members {
                    warn!(
                        session_id = %session,
                        current_members = record.member_count(),
                        max_members = self.max_members,
                        "Session member limit reached"
                    );
                    return Err(Error::ResourceExhausted(format!(
                        "Session {session} is full ({} members)",
                        self.max_members
                    )));
                }
                record.insert(connection.clone());
                Ok(JoinOutcome {
                    created: false,
                    rejoined: false,
                    member_count: record.member_count(),
                })
            }
            Entry::Vacant(entry) => {
                let reserved = self
                    .session_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (self.max_sessions == 0 || n < self.max_sessions).then_some(n + 1)
                    });
                if reserved.is_err() {
                    warn!(
                        session_id = %session,
                        max_sessions = self.max_sessions,
                        "Session limit reached"
                    );
                    return Err(Error::ResourceExhausted(format!(
                        "Maximum number of sessions reached ({})",
                        self.max_sessions
                    )));
                }

                let record = SessionRecord::new(session.clone());
                record.insert(connection.clone());
                entry.insert(Arc::new(record));
                info!(session_id = %session, "Session created");
                Ok(JoinOutcome {
                    created: true,
                    rejoined: false,
                    member_count: 1,
                })
            }
        }
    }

    /// Remove `connection` from `session`; destroys the session when it empties.
    ///
    /// `None` when the session is unknown or the connection was not a member.
    pub fn leave(&self, session: &SessionId, connection: &ConnectionId) -> Option<LeaveOutcome> {
        let record = self.get(session)?;
        if !record.remove(connection) {
            return None;
        }

        let destroyed = self
            .sessions
            .remove_if(session, |_, r| Arc::ptr_eq(r, &record) && r.is_empty())
            .is_some();
        if destroyed {
            self.session_count.fetch_sub(1, Ordering::AcqRel);
            info!(session_id = %session, "Session destroyed");
        }

        Some(LeaveOutcome {
            remaining: record.member_count(),
            destroyed,
        })
    }

    /// Replace a session's relay list.
    ///
    /// Relays that are not members are dropped and reported as an invariant
    /// violation; the members among them are still stored.
    pub fn set_relays(&self, session: &SessionId, relays: Vec<ConnectionId>) -> Result<()> {
        let Some(record) = self.get(session) else {
            return Ok(());
        };

        let (valid, stray): (Vec<_>, Vec<_>) =
            relays.into_iter().partition(|id| record.contains(id));
        *record.relay_nodes.write() = valid;

        if stray.is_empty() {
            Ok(())
        } else {
            Err(Error::InvariantViolation(format!(
                "Relay list for session {session} references non-members: {}",
                stray
                    .iter()
                    .map(ConnectionId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }

    #[must_use]
    pub fn relay_nodes(&self, session: &SessionId) -> Vec<ConnectionId> {
        self.get(session)
            .map(|record| record.relay_nodes())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn members(&self, session: &SessionId) -> Vec<ConnectionId> {
        self.get(session)
            .map(|record| record.members())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn member_count(&self, session: &SessionId) -> usize {
        self.get(session).map_or(0, |record| record.member_count())
    }

    #[must_use]
    pub fn contains(&self, session: &SessionId, connection: &ConnectionId) -> bool {
        self.get(session)
            .is_some_and(|record| record.contains(connection))
    }

    #[must_use]
    pub fn stats(&self, session: &SessionId) -> Option<SessionStats> {
        self.get(session).map(|record| SessionStats {
            session_id: session.clone(),
            connection_count: record.member_count(),
            relay_node_count: record.relay_nodes.read().len(),
        })
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.sessions.clear();
        self.session_count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave_lifecycle() {
        let directory = SessionDirectory::new(0, 0);
        let room = SessionId::from("room");

        let first = directory.join(&room, &"a".into()).unwrap();
        assert!(first.created);
        let second = directory.join(&room, &"b".into()).unwrap();
        assert_eq!(second.member_count, 2);
        assert_eq!(directory.session_count(), 1);

        let again = directory.join(&room, &"a".into()).unwrap();
        assert!(again.rejoined);
        assert_eq!(again.member_count, 2);

        let left = directory.leave(&room, &"a".into()).unwrap();
        assert_eq!(left, LeaveOutcome { remaining: 1, destroyed: false });
        assert!(directory.leave(&room, &"a".into()).is_none());

        let last = directory.leave(&room, &"b".into()).unwrap();
        assert!(last.destroyed);
        assert_eq!(directory.session_count(), 0);
        assert!(directory.stats(&room).is_none());
    }

    #[test]
    fn test_session_limit() {
        let directory = SessionDirectory::new(1, 0);
        directory.join(&"one".into(), &"a".into()).unwrap();
        let err = directory.join(&"two".into(), &"b".into()).unwrap_err();
        assert_eq!(err.kind(), "resource_exhausted");

        directory.leave(&"one".into(), &"a".into());
        assert!(directory.join(&"two".into(), &"b".into()).is_ok());
    }

    #[test]
    fn test_member_limit() {
        let directory = SessionDirectory::new(0, 2);
        let room = SessionId::from("room");
        directory.join(&room, &"a".into()).unwrap();
        directory.join(&room, &"b".into()).unwrap();
        assert!(directory.join(&room, &"c".into()).is_err());
        // rejoining never counts against the limit
        assert!(directory.join(&room, &"a".into()).is_ok());
    }

    #[test]
    fn test_relays_must_be_members() {
        let directory = SessionDirectory::new(0, 0);
        let room = SessionId::from("room");
        directory.join(&room, &"a".into()).unwrap();
        directory.join(&room, &"b".into()).unwrap();

        directory.set_relays(&room, vec!["a".into()]).unwrap();
        assert_eq!(directory.stats(&room).unwrap().relay_node_count, 1);

        let err = directory
            .set_relays(&room, vec!["b".into(), "ghost".into()])
            .unwrap_err();
        assert_eq!(err.kind(), "invariant_violation");
        assert_eq!(directory.relay_nodes(&room), vec![ConnectionId::from("b")]);

        directory.leave(&room, &"b".into());
        assert!(directory.relay_nodes(&room).is_empty());
    }

    #[test]
    fn test_concurrent_joins_keep_count_consistent() {
        let directory = Arc::new(SessionDirectory::new(0, 0));
        let room = SessionId::from("room");

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let directory = Arc::clone(&directory);
                let room = room.clone();
                scope.spawn(move || {
                    for i in 0..100 {
                        let id = ConnectionId::from(format!("{worker}-{i}"));
                        directory.join(&room, &id).unwrap();
                        if i % 2 == 0 {
                            directory.leave(&room, &id);
                        }
                    }
                });
            }
        });

        assert_eq!(directory.member_count(&room), 400);
        assert_eq!(directory.members(&room).len(), 400);
    }
}
