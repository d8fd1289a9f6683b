//! The lock manager: a process-wide registry mapping normalized URL paths
//! to the locks held on them, plus the compatibility rules for taking a
//! new lock.
//!
//! All mutation goes through [`LockManager`]; a path's entry exists only
//! while it holds at least one lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;
use xmltree::Element;

use crate::util::monotonic_secs;

/// Lock tokens are always `urn:uuid:<v4-uuid>`, 45 characters.
pub(crate) const LOCK_TOKEN_LEN: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// A live write lock on one path.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Normalized path the lock is attached to.
    pub path: String,
    /// `urn:uuid:<v4>` token.
    pub token: String,
    pub scope: LockScope,
    /// Depth: infinity (true) or 0 (false). Depth 1 is rejected at parse time.
    pub deep: bool,
    /// Opaque owner fragment from the LOCK request, echoed verbatim.
    pub owner: Option<Element>,
    /// Absolute expiry on the monotonic clock, in seconds; 0 = never.
    pub timeout: u64,
}

impl DavLock {
    pub(crate) fn refresh_timeout(&mut self, timeout_secs: u64) {
        self.timeout = match timeout_secs {
            0 => 0,
            n => monotonic_secs() + n,
        };
    }

    /// Seconds until expiry, None when infinite.
    pub(crate) fn remaining_secs(&self) -> Option<u64> {
        match self.timeout {
            0 => None,
            t => Some(t.saturating_sub(monotonic_secs())),
        }
    }
}

/// A `(path, token)` pair submitted through the `If:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockSubmitted {
    pub path: String,
    pub token: String,
}

impl LockSubmitted {
    pub fn new(path: &str, token: &str) -> LockSubmitted {
        LockSubmitted {
            path: path.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn matches(&self, lock: &DavLock) -> bool {
        (self.path == lock.path || (self.path.is_empty() && lock.path == "/"))
            && self.token == lock.token
    }
}

#[derive(Debug, Default)]
struct PathState {
    locks: Vec<DavLock>,
}

/// The path registry. Cheap to clone; all clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct LockManager(Arc<Mutex<HashMap<String, PathState>>>);

/// Generate a fresh lock token.
pub(crate) fn generate_token() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

// The chain of registry keys for a path: "/", "/a", "/a/b", root first.
fn ancestor_chain(path: &str) -> Vec<String> {
    let mut chain = vec!["/".to_string()];
    let mut partial = String::new();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        partial.push('/');
        partial.push_str(seg);
        chain.push(partial.clone());
    }
    chain
}

fn normalize(path: &str) -> String {
    let p = path.trim_end_matches('/');
    if p.is_empty() {
        "/".to_string()
    } else {
        p.to_string()
    }
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::default()
    }

    /// Create a lock value; it is not attached until [`try_add_lock`]
    /// accepts it. Fails when the token does not have the fixed length.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_lock(
        &self,
        path: &str,
        token: &str,
        scope: LockScope,
        deep: bool,
        owner: Option<Element>,
        timeout_secs: u64,
    ) -> Option<DavLock> {
        if token.len() != LOCK_TOKEN_LEN {
            return None;
        }
        let mut lock = DavLock {
            path: normalize(path),
            token: token.to_string(),
            scope,
            deep,
            owner,
            timeout: 0,
        };
        lock.refresh_timeout(timeout_secs);
        Some(lock)
    }

    /// Attach a lock, checking compatibility against every lock on the
    /// path and its ancestors:
    ///
    /// | existing \ new | exclusive | shared |
    /// |---|---|---|
    /// | (none)    | accept | accept |
    /// | shared    | reject | accept |
    /// | exclusive | reject | reject |
    pub(crate) fn try_add_lock(&self, lock: DavLock) -> Result<DavLock, ()> {
        let mut paths = self.0.lock();
        for key in ancestor_chain(&lock.path) {
            let Some(state) = paths.get(&key) else {
                continue;
            };
            if state.locks.iter().any(|l| l.scope == LockScope::Exclusive) {
                return Err(());
            }
            if lock.scope == LockScope::Exclusive && !state.locks.is_empty() {
                return Err(());
            }
        }
        let ret = lock.clone();
        paths.entry(lock.path.clone()).or_default().locks.push(lock);
        Ok(ret)
    }

    /// Find a live lock by token, walking the ancestor chain root first.
    pub(crate) fn get_lock(&self, path: &str, token: &str) -> Option<DavLock> {
        let paths = self.0.lock();
        for key in ancestor_chain(&normalize(path)) {
            if let Some(state) = paths.get(&key) {
                if let Some(l) = state.locks.iter().find(|l| l.token == token) {
                    return Some(l.clone());
                }
            }
        }
        debug!("no lock with token {} for {}", token, path);
        None
    }

    /// True iff some lock on the path or an ancestor was not submitted.
    pub(crate) fn has_other_locks(&self, path: &str, submitted: &[LockSubmitted]) -> bool {
        let paths = self.0.lock();
        for key in ancestor_chain(&normalize(path)) {
            if let Some(state) = paths.get(&key) {
                for lock in &state.locks {
                    if !submitted.iter().any(|s| s.matches(lock)) {
                        debug!("missing lock: {} {}", lock.path, lock.token);
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Remove the lock identified by `token` on `path` or an ancestor.
    pub(crate) fn unlock(&self, path: &str, token: &str) -> Result<(), ()> {
        let mut paths = self.0.lock();
        for key in ancestor_chain(&normalize(path)) {
            if let Some(state) = paths.get_mut(&key) {
                if let Some(idx) = state.locks.iter().position(|l| l.token == token) {
                    state.locks.remove(idx);
                    if state.locks.is_empty() {
                        paths.remove(&key);
                    }
                    return Ok(());
                }
            }
        }
        Err(())
    }

    /// Refresh the timeout of the lock identified by `token`.
    pub(crate) fn refresh(&self, path: &str, token: &str, timeout_secs: u64) -> Option<DavLock> {
        let mut paths = self.0.lock();
        for key in ancestor_chain(&normalize(path)) {
            if let Some(state) = paths.get_mut(&key) {
                if let Some(l) = state.locks.iter_mut().find(|l| l.token == token) {
                    l.refresh_timeout(timeout_secs);
                    return Some(l.clone());
                }
            }
        }
        None
    }

    /// All locks on the path and its ancestors, for `lockdiscovery`.
    pub(crate) fn locks_along(&self, path: &str) -> Vec<DavLock> {
        let paths = self.0.lock();
        let mut out = Vec::new();
        for key in ancestor_chain(&normalize(path)) {
            if let Some(state) = paths.get(&key) {
                out.extend(state.locks.iter().cloned());
            }
        }
        out
    }
}
