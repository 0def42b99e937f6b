use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::domain::company::CompanyId;
use crate::domain::rule::ApprovalRule;

#[derive(Clone, Debug)]
struct CachedRules {
    rules: Arc<Vec<ApprovalRule>>,
    cached_at: DateTime<Utc>,
}

/// Per-company cache of active rule sets with a fixed time-to-live.
///
/// Entries can outlive a rule's effective window by up to one TTL, so callers
/// re-check `ApprovalRule::is_in_effect` on every read. Saving a rule should be
/// followed by [`RuleCache::invalidate`] for its company.
#[derive(Debug)]
pub struct RuleCache {
    ttl: Duration,
    entries: Mutex<HashMap<CompanyId, CachedRules>>,
}

impl RuleCache {
    pub fn new(ttl_secs: u64) -> Self {
        let ttl = Duration::seconds(i64::from(u32::try_from(ttl_secs).unwrap_or(u32::MAX)));
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached rules for `company` if the entry is younger than the TTL.
    pub fn get(&self, company: &CompanyId, now: DateTime<Utc>) -> Option<Arc<Vec<ApprovalRule>>> {
        let mut entries = self.lock();
        let fresh = match entries.get(company) {
            Some(entry) => now - entry.cached_at < self.ttl,
            None => return None,
        };

        if fresh {
            entries.get(company).map(|entry| Arc::clone(&entry.rules))
        } else {
            entries.remove(company);
            None
        }
    }

    pub fn put(
        &self,
        company: CompanyId,
        rules: Vec<ApprovalRule>,
        now: DateTime<Utc>,
    ) -> Arc<Vec<ApprovalRule>> {
        let rules = Arc::new(rules);
        self.lock().insert(company, CachedRules { rules: Arc::clone(&rules), cached_at: now });
        rules
    }

    pub fn invalidate(&self, company: &CompanyId) {
        self.lock().remove(company);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CompanyId, CachedRules>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new(300)
    }
}
