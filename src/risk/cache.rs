//! TTL cache of risk assessments keyed by token

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::RiskAssessment;

/// Cached assessment with TTL
#[derive(Clone)]
struct CachedAssessment {
    assessment: Arc<RiskAssessment>,
    cached_at: Instant,
}

impl CachedAssessment {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Assessments are replaced on refresh, never mutated
pub struct RiskCache {
    entries: DashMap<Pubkey, CachedAssessment>,
    ttl: Duration,
}

impl RiskCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fresh assessment for `token`, evicting it when stale
    pub fn get(&self, token: &Pubkey) -> Option<Arc<RiskAssessment>> {
        if let Some(entry) = self.entries.get(token) {
            if !entry.is_expired(self.ttl) {
                return Some(entry.assessment.clone());
            }
        }
        self.entries.remove_if(token, |_, e| e.is_expired(self.ttl));
        None
    }

    pub fn insert(&self, assessment: Arc<RiskAssessment>) {
        self.entries.insert(
            assessment.token,
            CachedAssessment {
                assessment,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, token: &Pubkey) {
        self.entries.remove(token);
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(self.ttl));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
