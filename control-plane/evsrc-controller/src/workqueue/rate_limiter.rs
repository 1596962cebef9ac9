use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Per-item exponential backoff: the n-th consecutive failure of an item
/// waits `base * 2^n`, capped at `max`.
#[derive(Debug)]
pub struct ExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash> ExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay before the next retry of `item`; counts one more failure.
    pub fn when(&mut self, item: K) -> Duration {
        let failures = self.failures.entry(item).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);
        let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn forget(&mut self, item: &K) {
        self.failures.remove(item);
    }

    pub fn num_requeues(&self, item: &K) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}
