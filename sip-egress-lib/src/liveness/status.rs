use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
  time::{SystemTime, UNIX_EPOCH},
};

/// DashMap type alias, uses ahash::RandomState as hashbuilder
type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Last known liveness of an element or a server group
pub struct Status {
  pub is_up: bool,
  /// Seconds since the epoch at which the current state was entered
  pub since: u64,
}

impl Status {
  fn new(is_up: bool) -> Self {
    Self {
      is_up,
      since: get_since_the_epoch(),
    }
  }
}

#[derive(Debug, Clone, Default)]
/// Concurrent status table keyed by element key or server group name.
/// A key is absent until its first observation.
pub(super) struct StatusMap {
  inner: Arc<DashMap<String, Status>>,
}

impl StatusMap {
  pub(super) fn get(&self, key: &str) -> Option<Status> {
    self.inner.get(key).map(|s| *s)
  }

  /// Record an observation. Returns true if it is the first one for the key or a transition.
  pub(super) fn update(&self, key: &str, is_up: bool) -> bool {
    use dashmap::mapref::entry::Entry;
    match self.inner.entry(key.to_string()) {
      Entry::Occupied(mut entry) => {
        if entry.get().is_up == is_up {
          return false;
        }
        entry.insert(Status::new(is_up));
        true
      }
      Entry::Vacant(entry) => {
        entry.insert(Status::new(is_up));
        true
      }
    }
  }

  /// Forget every key not in `keys`
  pub(super) fn retain_keys(&self, keys: &HashSet<String>) {
    self.inner.retain(|k, _| keys.contains(k));
  }

  pub(super) fn clear(&self) {
    self.inner.clear();
  }

  pub(super) fn snapshot(&self) -> HashMap<String, Status> {
    self.inner.iter().map(|e| (e.key().clone(), *e.value())).collect()
  }
}

/// Current time since the epoch in seconds
fn get_since_the_epoch() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}
