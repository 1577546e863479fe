//! Prepared statement caching.
//!
//! Each connection keeps one server-side prepared statement per distinct
//! normalized query text. Entries live until the connection closes, at which
//! point [`StatementCache::drain`] hands them back for deallocation.

use std::fmt;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::driver::ResultSource;

/// A result source shared between the cache and every cursor bound to it.
pub type SharedSource = Arc<Mutex<Box<dyn ResultSource>>>;

// ============================================================================
// Prepared Statement
// ============================================================================

/// A statement prepared on the server under a generated name.
pub struct PreparedStatement {
    /// Server-side name for this statement (e.g., "prep0")
    pub name: String,
    /// The normalized SQL text it was prepared from
    pub query: String,
    /// Handle that executes the statement
    pub source: SharedSource,
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("name", &self.name)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Statement Cache
// ============================================================================

/// Query text → prepared statement.
///
/// The cache is unbounded: names are derived from the cache size at
/// insertion, so evicting entries would make later names collide with
/// statements still alive on the server.
pub struct StatementCache {
    cache: LruCache<String, Arc<PreparedStatement>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self {
            cache: LruCache::unbounded(),
        }
    }

    /// Look up a statement by normalized query text.
    pub fn get(&mut self, query: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.get(query).map(Arc::clone)
    }

    #[inline]
    pub fn contains(&self, query: &str) -> bool {
        self.cache.contains(query)
    }

    /// Name the next inserted statement will get.
    pub fn next_statement_name(&self) -> String {
        format!("prep{}", self.cache.len())
    }

    /// Insert a statement, returning the shared entry.
    pub fn insert(&mut self, statement: PreparedStatement) -> Arc<PreparedStatement> {
        let statement = Arc::new(statement);
        self.cache
            .put(statement.query.clone(), Arc::clone(&statement));
        statement
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Remove every statement, least recently used first.
    pub fn drain(&mut self) -> Vec<Arc<PreparedStatement>> {
        let mut statements = Vec::with_capacity(self.cache.len());
        while let Some((_, statement)) = self.cache.pop_lru() {
            statements.push(statement);
        }
        statements
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.cache.iter().map(|(_, s)| &s.name))
            .finish()
    }
}
