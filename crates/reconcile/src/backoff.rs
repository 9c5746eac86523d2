//! Per-key exponential backoff with full jitter.

use std::sync::Mutex;
use std::time::Duration;

use kaudit_core::ResourceKey;
use rand::Rng;
use rustc_hash::FxHashMap;

pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: Mutex<FxHashMap<ResourceKey, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap: cap.max(base), attempts: Mutex::new(FxHashMap::default()) }
    }

    /// Upper bound of the delay for the given zero-based attempt: `min(cap, base * 2^attempt)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.cap, |d| d.min(self.cap))
    }

    /// Record one more failure for `key` and pick a delay uniformly in `[0, ceiling]`.
    /// Returns the delay and the number of consecutive failures so far.
    pub fn next(&self, key: &ResourceKey) -> (Duration, u32) {
        let attempt = {
            let mut map = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            let n = map.entry(key.clone()).or_insert(0);
            let current = *n;
            *n = n.saturating_add(1);
            current
        };
        let ceiling_ms = self.ceiling(attempt).as_millis() as u64;
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms));
        (delay, attempt + 1)
    }

    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).get(key).copied().unwrap_or(0)
    }

    pub fn reset(&self, key: &ResourceKey) {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }
}
