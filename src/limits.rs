// Runtime-tunable scaling limits with a version counter

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// CPU% above which a container counts as overloaded.
    pub cpu_limit: f64,
    /// RAM% above which a container counts as overloaded.
    pub ram_limit: f64,
    /// Clones a parent may have before it is paused and its clones removed.
    pub clone_num: usize,
    pub poll_interval: Duration,
    pub auto_scale_enabled: bool,
}

impl Limits {
    pub fn is_overloaded(&self, cpu_percent: f64, ram_percent: f64) -> bool {
        cpu_percent > self.cpu_limit || ram_percent > self.ram_limit
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cpu_limit: 50.0,
            ram_limit: 5.0,
            clone_num: 2,
            poll_interval: Duration::from_secs(1),
            auto_scale_enabled: true,
        }
    }
}

/// Limits shared between the polling loop and whoever edits them. Every
/// change bumps the version so in-flight decisions can tell they are stale.
#[derive(Debug, Default)]
pub struct SharedLimits {
    limits: RwLock<Limits>,
    version: AtomicU64,
}

impl SharedLimits {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits: RwLock::new(limits),
            version: AtomicU64::new(0),
        }
    }

    /// Current limits together with the version they belong to.
    pub fn snapshot(&self) -> (Limits, u64) {
        let guard = self.limits.read().unwrap_or_else(PoisonError::into_inner);
        (guard.clone(), self.version.load(Ordering::Acquire))
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Swap in new limits. Returns the new version.
    pub fn replace(&self, limits: Limits) -> u64 {
        self.update(|l| *l = limits)
    }

    /// Edit the limits in place. Returns the new version.
    pub fn update(&self, f: impl FnOnce(&mut Limits)) -> u64 {
        let mut guard = self.limits.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        // Bumped while the write lock is held so snapshot() never pairs new
        // limits with an old version.
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_auto_scale(&self, enabled: bool) -> u64 {
        self.update(|l| l.auto_scale_enabled = enabled)
    }
}
