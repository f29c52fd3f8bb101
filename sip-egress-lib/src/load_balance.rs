//! Load balancing: ordering of server groups and of elements within a group
//!
//! Elements are first split into priority tiers (ascending). Every tier is then
//! ordered according to the [LbType] of the group.

use crate::server_group::{LbType, ServerGroup, ServerGroupElement};
use rand::Rng;

/// Fixed seeds so that the same affinity key maps to the same element across restarts
const AFFINITY_HASH_SEEDS: (u64, u64, u64, u64) = (
  0x243f_6a88_85a3_08d3,
  0x1319_8a2e_0370_7344,
  0xa409_3822_299f_31d0,
  0x082e_fa98_ec4e_6c89,
);

#[derive(Debug, Clone)]
/// Orders server groups and elements for one egress attempt
pub struct LoadBalancer {
  /// Hash builder for affinity based policies [LbType::CallId] and [LbType::Affinity]
  hasher: ahash::RandomState,
}

impl Default for LoadBalancer {
  fn default() -> Self {
    Self::new()
  }
}

impl LoadBalancer {
  /// Create a new load balancer
  pub fn new() -> Self {
    let (k0, k1, k2, k3) = AFFINITY_HASH_SEEDS;
    Self {
      hasher: ahash::RandomState::with_seeds(k0, k1, k2, k3),
    }
  }

  /// Order server groups by priority ascending. Ties keep the given order.
  pub fn order_groups<'a>(&self, groups: &[&'a ServerGroup]) -> Vec<&'a ServerGroup> {
    let mut ordered = groups.to_vec();
    ordered.sort_by_key(|sg| sg.priority);
    ordered
  }

  /// Order elements of a group. Lower priority tiers come first, then each tier is ordered by `lb_type`.
  /// Affinity policies without an affinity key fall back to [LbType::Weight].
  pub fn order_elements(
    &self,
    elements: &[ServerGroupElement],
    lb_type: LbType,
    affinity_key: Option<&str>,
  ) -> Vec<ServerGroupElement> {
    let mut sorted = elements.to_vec();
    sorted.sort_by_key(|e| e.priority);

    let mut ordered = Vec::with_capacity(sorted.len());
    for tier in sorted.chunk_by(|a, b| a.priority == b.priority) {
      let mut tier = tier.to_vec();
      match (lb_type, affinity_key) {
        (LbType::Weight, _) | (LbType::CallId | LbType::Affinity, None) => {
          ordered.extend(weighted_shuffle(tier));
        }
        (LbType::Once, _) => {
          if let Some(index) = weighted_pick(&tier) {
            ordered.push(tier.swap_remove(index));
          }
        }
        (LbType::CallId | LbType::Affinity, Some(key)) => {
          // Sort by identity so that DNS answer order does not move the chosen element
          tier.sort_by_key(|e| e.unique_key());
          let start = (self.hasher.hash_one(key) % tier.len() as u64) as usize;
          tier.rotate_left(start);
          ordered.extend(tier);
        }
      }
    }
    ordered
  }
}

/// Weighted random draw without replacement over the whole list
fn weighted_shuffle(mut pool: Vec<ServerGroupElement>) -> Vec<ServerGroupElement> {
  let mut ordered = Vec::with_capacity(pool.len());
  while let Some(index) = weighted_pick(&pool) {
    ordered.push(pool.remove(index));
  }
  ordered
}

/// Pick an index with probability proportional to the weight.
/// If every weight is zero the pick is uniform.
fn weighted_pick(pool: &[ServerGroupElement]) -> Option<usize> {
  if pool.is_empty() {
    return None;
  }
  let total: u64 = pool.iter().map(|e| e.weight as u64).sum();
  let mut rng = rand::rng();
  if total == 0 {
    return Some(rng.random_range(0..pool.len()));
  }
  let mut point = rng.random_range(0..total);
  for (index, element) in pool.iter().enumerate() {
    let weight = element.weight as u64;
    if point < weight {
      return Some(index);
    }
    point -= weight;
  }
  Some(pool.len() - 1)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{message::Transport, server_group::ServerGroupBuilder};
  use std::collections::HashSet;

  fn element(host: &str, priority: u32, weight: u32) -> ServerGroupElement {
    ServerGroupElement::new(host, 5060, Transport::Udp)
      .with_priority(priority)
      .with_weight(weight)
  }

  fn create_test_elements() -> Vec<ServerGroupElement> {
    vec![
      element("192.0.2.1", 10, 100),
      element("192.0.2.2", 5, 100),
      element("192.0.2.3", 10, 100),
      element("192.0.2.4", 5, 100),
      element("192.0.2.5", 20, 100),
    ]
  }

  #[test]
  fn test_order_groups_by_priority_stable() {
    let sg = |name: &str, priority: u32| {
      ServerGroupBuilder::default()
        .name(name)
        .network_name("net")
        .priority(priority)
        .elements(vec![element("192.0.2.1", 10, 100)])
        .build()
        .unwrap()
    };
    let (a, b, c) = (sg("a", 10), sg("b", 5), sg("c", 10));
    let balancer = LoadBalancer::new();
    let ordered = balancer.order_groups(&[&a, &b, &c]);
    let names: Vec<_> = ordered.iter().map(|sg| sg.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a", "c"]);
  }

  #[test]
  fn test_weight_tries_every_element_once_by_tier() {
    let balancer = LoadBalancer::new();
    let elements = create_test_elements();
    for _ in 0..20 {
      let ordered = balancer.order_elements(&elements, LbType::Weight, None);
      assert_eq!(ordered.len(), elements.len());
      let keys: HashSet<_> = ordered.iter().map(|e| e.unique_key()).collect();
      assert_eq!(keys.len(), elements.len());
      let priorities: Vec<_> = ordered.iter().map(|e| e.priority).collect();
      assert_eq!(priorities, vec![5, 5, 10, 10, 20]);
    }
  }

  #[test]
  fn test_weight_zero_weight_goes_last() {
    let balancer = LoadBalancer::new();
    let elements = vec![element("192.0.2.1", 10, 0), element("192.0.2.2", 10, 100)];
    for _ in 0..20 {
      let ordered = balancer.order_elements(&elements, LbType::Weight, None);
      assert_eq!(ordered[0].host, "192.0.2.2");
      assert_eq!(ordered[1].host, "192.0.2.1");
    }
  }

  #[test]
  fn test_once_offers_one_element_per_tier() {
    let balancer = LoadBalancer::new();
    let ordered = balancer.order_elements(&create_test_elements(), LbType::Once, None);
    let priorities: Vec<_> = ordered.iter().map(|e| e.priority).collect();
    assert_eq!(priorities, vec![5, 10, 20]);
  }

  #[test]
  fn test_affinity_is_stable() {
    let balancer = LoadBalancer::new();
    let mut elements = create_test_elements();
    let first = balancer.order_elements(&elements, LbType::CallId, Some("call-1@example.com"));
    // Different answer order must not change the choice
    elements.reverse();
    let second = LoadBalancer::new().order_elements(&elements, LbType::CallId, Some("call-1@example.com"));
    assert_eq!(first, second);
    assert_eq!(first.len(), elements.len());
    assert_eq!(first[0].priority, 5);
  }

  #[test]
  fn test_affinity_without_key_falls_back_to_weight() {
    let balancer = LoadBalancer::new();
    let ordered = balancer.order_elements(&create_test_elements(), LbType::Affinity, None);
    assert_eq!(ordered.len(), 5);
  }

  #[test]
  fn test_empty_elements() {
    let balancer = LoadBalancer::new();
    for lb_type in [LbType::Weight, LbType::Once, LbType::CallId, LbType::Affinity] {
      assert!(balancer.order_elements(&[], lb_type, Some("key")).is_empty());
    }
  }
}
