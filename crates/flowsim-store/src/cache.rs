//! Time-bounded cache with an injectable clock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<Instant>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      now: Mutex::new(Instant::now()),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Entries expire `ttl` after they were inserted. Expired entries are dropped
/// lazily on lookup.
pub struct TtlCache<K, V> {
  ttl: Duration,
  clock: Arc<dyn Clock>,
  entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
  pub fn new(ttl: Duration) -> Self {
    Self::with_clock(ttl, Arc::new(SystemClock))
  }

  pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self {
      ttl,
      clock,
      entries: Mutex::new(HashMap::new()),
    }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn get(&self, key: &K) -> Option<V> {
    let now = self.clock.now();
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    match entries.get(key) {
      Some((inserted, value)) if now.duration_since(*inserted) < self.ttl => Some(value.clone()),
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  pub fn insert(&self, key: K, value: V) {
    let now = self.clock.now();
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key, (now, value));
  }

  pub fn invalidate(&self, key: &K) {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(key);
  }

  pub fn clear(&self) {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }

  /// Number of entries held, including expired ones not yet looked up.
  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entries_expire() {
    let clock = Arc::new(ManualClock::new());
    let cache = TtlCache::with_clock(Duration::from_secs(60), clock.clone());

    cache.insert("featured", vec![1, 2]);
    clock.advance(Duration::from_secs(59));
    assert_eq!(cache.get(&"featured"), Some(vec![1, 2]));

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get(&"featured"), None);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_reinsert_restarts_ttl() {
    let clock = Arc::new(ManualClock::new());
    let cache = TtlCache::with_clock(Duration::from_secs(10), clock.clone());

    cache.insert(1, "a");
    clock.advance(Duration::from_secs(8));
    cache.insert(1, "b");
    clock.advance(Duration::from_secs(8));
    assert_eq!(cache.get(&1), Some("b"));

    cache.invalidate(&1);
    assert_eq!(cache.get(&1), None);
  }
}
