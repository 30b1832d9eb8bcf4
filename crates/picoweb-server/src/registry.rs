//! Connection registry.
//!
//! Maps the transport's connection identity to a session handle and owns
//! every live [`Session`]. Both maps change together inside one call, so a
//! lookup never finds a half-registered or half-removed session. A miss
//! after removal is the normal post-close state.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use picoweb_core::SessionHandle;
use tracing::{debug, error, warn};

use crate::error::RegistryError;
use crate::session::Session;

/// Owner of all live sessions.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    sessions: HashMap<SessionHandle, Session<C>>,
    by_conn: HashMap<C, SessionHandle>,
    /// Last handle issued.
    last_handle: u32,
    max_sessions: usize,
}

impl<C: Copy + Eq + Hash + Debug> ConnectionRegistry<C> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_conn: HashMap::new(),
            last_handle: SessionHandle::FIRST.as_u32() - 1,
            max_sessions,
        }
    }

    /// Register a newly accepted connection.
    ///
    /// A duplicate identity is an adapter bug; it is logged and refused
    /// rather than replacing the live session.
    pub fn create(&mut self, conn: C, now: u64) -> Result<SessionHandle, RegistryError> {
        if let Some(existing) = self.by_conn.get(&conn) {
            error!(?conn, handle = %existing, "Connection registered twice");
            return Err(RegistryError::DuplicateConnection(format!("{conn:?}")));
        }
        if self.sessions.len() >= self.max_sessions {
            warn!(?conn, max = self.max_sessions, "Session table full, rejecting connection");
            return Err(RegistryError::Full {
                max: self.max_sessions,
            });
        }
        let Some(handle) = self.issue_handle() else {
            error!(?conn, "Session handles exhausted");
            return Err(RegistryError::HandlesExhausted);
        };

        self.sessions.insert(handle, Session::new(handle, conn, now));
        self.by_conn.insert(conn, handle);
        debug!(?conn, %handle, "Registered session");
        Ok(handle)
    }

    /// Scan forward from the last issued handle, skipping the reserved range
    /// and any handle still live.
    fn issue_handle(&mut self) -> Option<SessionHandle> {
        let mut candidate = self.last_handle;
        // At most `len` handles are live, so one of the next `len + 1` is free.
        for _ in 0..=self.sessions.len() {
            candidate = candidate.wrapping_add(1);
            if candidate < SessionHandle::FIRST.as_u32() {
                candidate = SessionHandle::FIRST.as_u32();
            }
            let handle = SessionHandle::from_raw(candidate);
            if !self.sessions.contains_key(&handle) {
                self.last_handle = candidate;
                return Some(handle);
            }
        }
        None
    }

    /// Retire the session for `conn`. Unknown identities are a no-op.
    pub fn remove(&mut self, conn: C) -> Option<Session<C>> {
        let handle = self.by_conn.remove(&conn)?;
        let session = self.sessions.remove(&handle);
        debug!(?conn, %handle, "Removed session");
        session
    }

    /// Retire the session for `handle`. Unknown handles are a no-op.
    pub fn remove_handle(&mut self, handle: SessionHandle) -> Option<Session<C>> {
        let conn = self.sessions.get(&handle)?.conn;
        self.remove(conn)
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session<C>> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session<C>> {
        self.sessions.get_mut(&handle)
    }

    pub fn handle_of(&self, conn: C) -> Option<SessionHandle> {
        self.by_conn.get(&conn).copied()
    }

    pub fn by_conn(&self, conn: C) -> Option<&Session<C>> {
        self.handle_of(conn).and_then(|h| self.sessions.get(&h))
    }

    pub fn by_conn_mut(&mut self, conn: C) -> Option<&mut Session<C>> {
        let handle = self.handle_of(conn)?;
        self.sessions.get_mut(&handle)
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.sessions.contains_key(&handle)
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.sessions.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session<C>> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
