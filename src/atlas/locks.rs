use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mutual exclusion keyed by logical path.
///
/// A held path also excludes its ancestors and descendants: deleting `dir`
/// and writing `dir/a.txt` never overlap. Only paths currently held occupy
/// the table, so it stays as small as the number of in-flight mutations.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    table: Arc<LockTable>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it until the guard drops
    pub fn acquire(&self, key: &str) -> PathGuard {
        let mut held = self.table.held();
        while held.iter().any(|other| overlaps(other, key)) {
            trace!(path = key, "waiting for path lock");
            held = self
                .table
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.to_string());

        PathGuard {
            table: Arc::clone(&self.table),
            key: key.to_string(),
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.table.held().contains(key)
    }
}

/// True when one path equals the other or lies beneath it
fn overlaps(a: &str, b: &str) -> bool {
    let beneath = |child: &str, parent: &str| {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    };
    beneath(a, b) || beneath(b, a)
}

#[must_use = "the path is unlocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PathGuard {
    table: Arc<LockTable>,
    key: String,
}

impl PathGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.table.held().remove(&self.key);
        self.table.released.notify_all();
    }
}
