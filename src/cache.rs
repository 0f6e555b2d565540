use crate::base::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

pub const LFU_DEFAULT: usize = 512;

// A least-frequently-used cache for word lookups. When the cache overflows,
// the 10% least used entries are purged in one sweep. The cache may be
// shared between parse jobs running on separate threads, so the state sits
// behind a mutex; the lexicon mmap underneath it needs no locking.

struct LfuState<K, V> {
  entries: HashMap<K, V>,
  use_count: HashMap<K, u64>,
  hits: u64,
  misses: u64,
}

pub struct LfuCache<K, V> {
  maxsize: usize,
  state: Mutex<LfuState<K, V>>,
}

impl<K: Clone + Eq + Hash, V: Clone> LfuCache<K, V> {
  pub fn new(maxsize: usize) -> Self {
    let state =
      LfuState { entries: HashMap::default(), use_count: HashMap::default(), hits: 0, misses: 0 };
    Self { maxsize, state: Mutex::new(state) }
  }

  pub fn lookup(&self, key: &K, func: impl FnOnce(&K) -> V) -> V {
    let mut state = match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    *state.use_count.entry(key.clone()).or_insert(0) += 1;
    if let Some(value) = state.entries.get(key).cloned() {
      state.hits += 1;
      return value;
    }
    let value = func(key);
    state.misses += 1;
    state.entries.insert(key.clone(), value.clone());
    if state.entries.len() > self.maxsize {
      // Purge the 10% least frequently used entries
      let mut counts: Vec<(K, u64)> =
        state.use_count.iter().map(|(k, v)| (k.clone(), *v)).collect();
      counts.sort_by(|a, b| a.1.cmp(&b.1));
      for (key, _) in counts.into_iter().take(self.maxsize / 10) {
        state.entries.remove(&key);
        state.use_count.remove(&key);
      }
    }
    value
  }

  pub fn stats(&self) -> (u64, u64) {
    let state = match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    (state.hits, state.misses)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn caches_computed_values() {
    let cache: LfuCache<String, usize> = LfuCache::new(16);
    let a = cache.lookup(&"orð".to_string(), |k| k.len());
    let b = cache.lookup(&"orð".to_string(), |_| unreachable!());
    assert_eq!(a, b);
    assert_eq!(cache.stats(), (1, 1));
  }

  #[test]
  fn purges_least_used_on_overflow() {
    let cache: LfuCache<u32, u32> = LfuCache::new(20);
    // Make key 0 popular, then overflow with one-shot keys
    for _ in 0..50 {
      cache.lookup(&0, |_| 0);
    }
    for i in 1..40 {
      cache.lookup(&i, |k| *k);
    }
    // The popular key should have survived every purge
    cache.lookup(&0, |_| unreachable!());
  }
}
