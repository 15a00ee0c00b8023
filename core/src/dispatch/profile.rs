use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Branch-entered marker for the optimizing layer. Never read by dispatch.
#[derive(Debug, Default)]
pub struct BranchProfile {
    entered: AtomicU64,
}

impl BranchProfile {
    #[inline(always)]
    pub fn enter(&self) {
        self.entered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entered(&self) -> u64 {
        self.entered.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct CallSiteStats {
    hits: AtomicU64,
    misses: AtomicU64,
    repairs: AtomicU64,
    installs: AtomicU64,
    merges: AtomicU64,
    megamorphic_lookups: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub repairs: u64,
    pub installs: u64,
    pub merges: u64,
    pub megamorphic_lookups: u64,
}

impl CallSiteStats {
    #[inline(always)]
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn repair(&self) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn install(&self) {
        self.installs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn megamorphic_lookup(&self) {
        self.megamorphic_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
            installs: self.installs.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            megamorphic_lookups: self.megamorphic_lookups.load(Ordering::Relaxed),
        }
    }
}
