use crate::forward::ProxyForwarder;
use std::{collections::HashMap, sync::Arc};

#[derive(Clone, Default)]
/// Registry of networks by name, each backed by its forwarding provider.
/// Handed to the egress engine and the liveness monitor at construction.
pub struct Networks {
  inner: HashMap<String, Arc<dyn ProxyForwarder>>,
}

impl Networks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a provider for a network name, replacing any previous one
  pub fn with_network(mut self, name: impl Into<String>, forwarder: Arc<dyn ProxyForwarder>) -> Self {
    self.inner.insert(name.into(), forwarder);
    self
  }

  /// Provider of the network, if registered
  pub fn get(&self, name: &str) -> Option<Arc<dyn ProxyForwarder>> {
    self.inner.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.inner.contains_key(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.inner.keys().map(|k| k.as_str())
  }
}

impl std::fmt::Debug for Networks {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list().entries(self.inner.keys()).finish()
  }
}
