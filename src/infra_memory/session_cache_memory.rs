use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The process-local session mirror. Entries may carry live handles; the
/// companion lock map hands out one login mutex per pair, created lazily and
/// never removed so every caller for a pair always sees the same mutex.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: DashMap<SessionKey, CachedSession>,
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionCache for MemorySessionCache {
    fn get(&self, key: &SessionKey) -> Option<CachedSession> {
        self.entries.get(key).map(|e| e.clone())
    }

    fn put(&self, entry: CachedSession) {
        self.entries.insert(entry.tokens.key(), entry);
    }

    fn invalidate(&self, key: &SessionKey) {
        self.entries.remove(key);
    }

    fn login_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
