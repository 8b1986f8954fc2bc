use crate::models::Outcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-outcome resolution counters, shared by every pipeline using a resolver
#[derive(Default)]
pub struct ResolutionStats {
    pub exact_matches: AtomicU64,
    pub context_matches: AtomicU64,
    pub fuzzy_matches: AtomicU64,
    pub sentinel_fallbacks: AtomicU64,
    pub unresolved: AtomicU64,
}

/// Point-in-time copy of [`ResolutionStats`] for audit reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditSnapshot {
    pub exact: u64,
    pub context: u64,
    pub fuzzy: u64,
    pub sentinel: u64,
    pub unresolved: u64,
}

impl ResolutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Exact => &self.exact_matches,
            Outcome::Context => &self.context_matches,
            Outcome::Fuzzy => &self.fuzzy_matches,
            Outcome::Sentinel => &self.sentinel_fallbacks,
            Outcome::Unresolved => &self.unresolved,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Exact => self.exact_matches.load(Ordering::Relaxed),
            Outcome::Context => self.context_matches.load(Ordering::Relaxed),
            Outcome::Fuzzy => self.fuzzy_matches.load(Ordering::Relaxed),
            Outcome::Sentinel => self.sentinel_fallbacks.load(Ordering::Relaxed),
            Outcome::Unresolved => self.unresolved.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            exact: self.get(Outcome::Exact),
            context: self.get(Outcome::Context),
            fuzzy: self.get(Outcome::Fuzzy),
            sentinel: self.get(Outcome::Sentinel),
            unresolved: self.get(Outcome::Unresolved),
        }
    }
}

impl AuditSnapshot {
    pub fn total(&self) -> u64 {
        self.exact + self.context + self.fuzzy + self.sentinel + self.unresolved
    }

    /// Calls answered by a fallback rather than an exact key
    pub fn guessed(&self) -> u64 {
        self.fuzzy + self.sentinel
    }
}
