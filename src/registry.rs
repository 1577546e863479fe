//! Process-wide registry of open connections.
//!
//! The registry only observes connections (it holds weak references), so it
//! never keeps one alive. It exists to support [`close_all`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::pg::connection::ConnectionInner;

/// Unique identity of a connection within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A set of connections that can be closed together.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, Weak<Mutex<ConnectionInner>>>>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::default);

impl Registry {
    /// The registry every connection joins when it is opened.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    pub(crate) fn register(&self, id: ConnectionId, inner: &Arc<Mutex<ConnectionInner>>) {
        self.connections.lock().insert(id, Arc::downgrade(inner));
    }

    pub(crate) fn unregister(&self, id: ConnectionId) {
        self.connections.lock().remove(&id);
    }

    /// Number of registered connections still alive.
    pub fn len(&self) -> usize {
        let mut connections = self.connections.lock();
        connections.retain(|_, weak| weak.strong_count() > 0);
        connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered connection that is still open. Failures are
    /// logged and do not stop the sweep. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        // Closing unregisters, so the lock must not be held meanwhile.
        let targets: Vec<_> = self.connections.lock().drain().collect();
        let mut closed = 0;
        for (id, weak) in targets {
            let Some(inner) = weak.upgrade() else {
                continue;
            };
            let mut inner = inner.lock();
            if inner.is_closed() {
                continue;
            }
            match inner.close() {
                Ok(()) => closed += 1,
                Err(err) => {
                    tracing::warn!(connection = %id, error = %err, "failed to close connection")
                }
            }
        }
        closed
    }
}

/// Close every open connection in the process.
pub fn close_all() -> usize {
    Registry::global().close_all()
}
