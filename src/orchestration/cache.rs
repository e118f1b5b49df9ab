//! Process-lifetime record of active units.
//!
//! Presence in the cache means the unit activated successfully. Workers
//! claim a name before activating it; the claim becomes a record on success
//! or is released on failure, so the same unit is never activated twice at
//! once even by orchestrations sharing one cache.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::core::unit::ActivationRecord;
use crate::shlog_trace;

/// Outcome of [`ActivationCache::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the activation of this unit.
    Claimed,
    /// Already active; the caller must not activate it.
    AlreadyActive(ActivationRecord),
    /// Another worker holds the claim.
    InProgress,
}

#[derive(Debug, Default)]
struct CacheInner {
    records: BTreeMap<String, ActivationRecord>,
    claims: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ActivationCache {
    inner: Mutex<CacheInner>,
}

impl ActivationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.lock().records.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ActivationRecord> {
        self.lock().records.get(name).cloned()
    }

    /// Store a record, replacing any previous one, and drop a held claim.
    pub fn record(&self, record: ActivationRecord) {
        let mut inner = self.lock();
        inner.claims.remove(&record.name);
        shlog_trace!("ActivationCache::record {}", record.name);
        inner.records.insert(record.name.clone(), record);
    }

    /// Forget an activation. Returns the removed record.
    pub fn invalidate(&self, name: &str) -> Option<ActivationRecord> {
        self.lock().records.remove(name)
    }

    /// All records, sorted by name.
    pub fn snapshot(&self) -> Vec<ActivationRecord> {
        self.lock().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Atomically check and claim `name`.
    ///
    /// With `force` an existing record does not block the claim; the record
    /// stays in place until the new activation replaces it.
    pub fn try_claim(&self, name: &str, force: bool) -> Claim {
        let mut inner = self.lock();
        if inner.claims.contains(name) {
            return Claim::InProgress;
        }
        if !force {
            if let Some(record) = inner.records.get(name) {
                return Claim::AlreadyActive(record.clone());
            }
        }
        inner.claims.insert(name.to_string());
        Claim::Claimed
    }

    /// Give up a claim without recording an activation.
    pub fn release(&self, name: &str) {
        self.lock().claims.remove(name);
    }

    pub fn is_claimed(&self, name: &str) -> bool {
        self.lock().claims.contains(name)
    }
}
