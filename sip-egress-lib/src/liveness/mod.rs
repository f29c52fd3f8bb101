//! Liveness monitoring of server group elements by periodic SIP OPTIONS probes
//!
//! Every unique element key referenced by a `ping_on` server group gets exactly one probe stream,
//! however many groups share it. Status changes are pushed to a [MetricsSink] on the first
//! observation and on every transition.

mod probe;
mod refresh;
mod status;

pub use refresh::ServerGroupSource;
pub use status::Status;

use crate::{
  constants::DEFAULT_PROBE_TIMEOUT_MSEC,
  dns::{DnsResolver, resolve_elements},
  metrics::MetricsSink,
  network::Networks,
  server_group::{ServerGroupElement, ServerGroupMap},
  trace::*,
};
use probe::{ProbeTarget, probe_service};
use status::StatusMap;
use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::{Arc, MutexGuard, PoisonError},
  time::Duration,
};
use tokio::{runtime::Handle, sync::Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Point-in-time copy of every known status
pub struct LivenessSnapshot {
  pub elements: HashMap<String, Status>,
  pub groups: HashMap<String, Status>,
}

/// Probe streams of one monitored server group map
struct Generation {
  server_groups: ServerGroupMap,
  cancel_token: CancellationToken,
}

/// Element keys of every monitored group, fixed for one generation
struct Topology {
  epoch: u64,
  group_elements: HashMap<String, Vec<String>>,
}

struct MonitorInner {
  networks: Networks,
  dns_resolver: Arc<dyn DnsResolver>,
  metrics: Arc<dyn MetricsSink>,
  probe_timeout: Duration,
  runtime_handle: Handle,
  elements: StatusMap,
  groups: StatusMap,
  /// Serializes restarts, held while the new generation is being resolved
  generation: Mutex<Option<Generation>>,
  /// Epoch of the live generation. Every status write happens under this lock.
  epoch: std::sync::Mutex<u64>,
}

#[derive(Clone)]
/// Liveness monitor, cheap to clone and shared with egress engines
pub struct LivenessMonitor {
  inner: Arc<MonitorInner>,
}

impl LivenessMonitor {
  /// Create an idle monitor. Probes are sent through `networks` and bounded by `probe_timeout`.
  pub fn new(
    networks: Networks,
    dns_resolver: Arc<dyn DnsResolver>,
    metrics: Arc<dyn MetricsSink>,
    probe_timeout: Option<Duration>,
    runtime_handle: Handle,
  ) -> Self {
    Self {
      inner: Arc::new(MonitorInner {
        networks,
        dns_resolver,
        metrics,
        probe_timeout: probe_timeout.unwrap_or(Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MSEC)),
        runtime_handle,
        elements: StatusMap::default(),
        groups: StatusMap::default(),
        generation: Mutex::new(None),
        epoch: std::sync::Mutex::new(0),
      }),
    }
  }

  /// (Re)start monitoring of `server_groups`.
  /// Probe streams of the previous map are cancelled and statuses of keys that are no longer monitored are dropped.
  pub async fn start_monitoring(&self, server_groups: ServerGroupMap) {
    let mut generation = self.inner.generation.lock().await;
    if let Some(previous) = generation.take() {
      previous.cancel_token.cancel();
    }

    let mut group_elements: BTreeMap<String, Vec<ServerGroupElement>> = BTreeMap::new();
    for sg in server_groups.values().filter(|sg| sg.ping_on) {
      let elements = match resolve_elements(self.inner.dns_resolver.as_ref(), sg).await {
        Ok(elements) => elements,
        Err(e) => {
          warn!("Failed to resolve server group {} for monitoring: {e}", sg.name);
          Vec::new()
        }
      };
      group_elements.insert(sg.name.clone(), elements);
    }

    // The first referencing group, in name order, owns the probe policy of a shared element
    let mut targets: BTreeMap<String, ProbeTarget> = BTreeMap::new();
    for (group_name, elements) in &group_elements {
      let Some(sg) = server_groups.get(group_name) else {
        continue;
      };
      for element in elements {
        let target = targets
          .entry(element.unique_key())
          .or_insert_with(|| ProbeTarget::new(element, sg));
        if !target.groups.contains(group_name) {
          target.groups.push(group_name.clone());
        }
      }
    }

    // Results of the previous generation still in flight are dropped from here on
    let topology = {
      let mut epoch = self.inner.lock_epoch();
      *epoch += 1;
      let topology = Arc::new(Topology {
        epoch: *epoch,
        group_elements: group_elements
          .iter()
          .map(|(name, elements)| (name.clone(), elements.iter().map(|e| e.unique_key()).collect()))
          .collect(),
      });
      self
        .inner
        .elements
        .retain_keys(&targets.keys().cloned().collect::<HashSet<_>>());
      self
        .inner
        .groups
        .retain_keys(&group_elements.keys().cloned().collect::<HashSet<_>>());
      for group_name in group_elements.keys() {
        self.inner.refresh_group_status(&topology, group_name);
      }
      topology
    };

    info!(
      "Start monitoring {} elements of {} server groups",
      targets.len(),
      group_elements.len()
    );
    let cancel_token = CancellationToken::new();
    for target in targets.into_values() {
      self.inner.runtime_handle.spawn(probe_service(
        self.inner.clone(),
        topology.clone(),
        target,
        cancel_token.child_token(),
      ));
    }
    *generation = Some(Generation {
      server_groups,
      cancel_token,
    });
  }

  /// Cancel every probe stream and forget all statuses
  pub async fn stop(&self) {
    let mut generation = self.inner.generation.lock().await;
    if let Some(previous) = generation.take() {
      previous.cancel_token.cancel();
      info!("Liveness monitoring stopped");
    }
    let mut epoch = self.inner.lock_epoch();
    *epoch += 1;
    self.inner.elements.clear();
    self.inner.groups.clear();
  }

  /// The server group map currently monitored
  pub async fn monitored_server_groups(&self) -> Option<ServerGroupMap> {
    self
      .inner
      .generation
      .lock()
      .await
      .as_ref()
      .map(|g| g.server_groups.clone())
  }

  /// Status of a server group name, or of an element key if no group has that name.
  /// Unknown names and not-yet-probed elements are down.
  pub fn get_status(&self, name: &str) -> bool {
    self
      .group_status(name)
      .or_else(|| self.element_status(name))
      .is_some_and(|s| s.is_up)
  }

  pub fn element_status(&self, element_key: &str) -> Option<Status> {
    self.inner.elements.get(element_key)
  }

  pub fn group_status(&self, group_name: &str) -> Option<Status> {
    self.inner.groups.get(group_name)
  }

  /// True only for elements whose last probe failed
  pub fn is_known_down(&self, element_key: &str) -> bool {
    self.element_status(element_key).is_some_and(|s| !s.is_up)
  }

  pub fn snapshot(&self) -> LivenessSnapshot {
    LivenessSnapshot {
      elements: self.inner.elements.snapshot(),
      groups: self.inner.groups.snapshot(),
    }
  }

  /// See [crate::server_group::is_server_group_map_updated]
  pub fn is_server_group_map_updated(&self, old: &ServerGroupMap, new: &ServerGroupMap) -> bool {
    crate::server_group::is_server_group_map_updated(old, new)
  }
}

impl MonitorInner {
  fn lock_epoch(&self) -> MutexGuard<'_, u64> {
    self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Apply a probe result. Results of a replaced or stopped generation are ignored.
  fn record_probe(&self, topology: &Topology, target: &ProbeTarget, is_up: bool) {
    let epoch = self.lock_epoch();
    if *epoch != topology.epoch {
      debug!("Dropping stale probe result of {}", target.key);
      return;
    }
    if !self.elements.update(&target.key, is_up) {
      return;
    }
    debug!("Element {} of {} is now {}", target.key, target.owner_group, if is_up { "up" } else { "down" });
    self.metrics.send_element_metric(&target.owner_group, &target.key, is_up);
    for group_name in &target.groups {
      self.refresh_group_status(topology, group_name);
    }
  }

  /// A group is up if any of its elements is up. Nothing is recorded while no element has been probed.
  /// Callers hold the epoch lock, so reading the elements and writing the group is atomic.
  fn refresh_group_status(&self, topology: &Topology, group_name: &str) {
    let Some(keys) = topology.group_elements.get(group_name) else {
      return;
    };
    let known: Vec<bool> = keys
      .iter()
      .filter_map(|k| self.elements.get(k))
      .map(|s| s.is_up)
      .collect();
    if !keys.is_empty() && known.is_empty() {
      return;
    }
    let is_up = known.into_iter().any(|up| up);
    if self.groups.update(group_name, is_up) {
      self.metrics.send_group_metric(group_name, is_up);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    dns::MockDnsResolver,
    error::TransportError,
    message::Transport,
    server_group::{LivenessPolicy, ServerGroup, ServerGroupBuilder},
    test_util::{Outcome, RecordingMetrics, ScriptedForwarder},
  };

  const E1: &str = "192.0.2.1:5060:UDP";
  const E2: &str = "192.0.2.2:5060:UDP";
  const E3: &str = "192.0.2.3:5060:UDP";

  fn policy() -> LivenessPolicy {
    LivenessPolicy {
      up_interval: Duration::from_secs(30),
      down_interval: Duration::from_secs(5),
      ..Default::default()
    }
  }

  fn monitored_group(name: &str, network: &str, hosts: &[&str]) -> ServerGroup {
    ServerGroupBuilder::default()
      .name(name)
      .network_name(network)
      .ping_on(true)
      .liveness_policy(policy())
      .elements(hosts.iter().map(|h| ServerGroupElement::new(*h, 5060, Transport::Udp)).collect())
      .build()
      .unwrap()
  }

  fn map_of(groups: Vec<ServerGroup>) -> ServerGroupMap {
    groups.into_iter().map(|sg| (sg.name.clone(), sg)).collect()
  }

  fn monitor(forwarder: Arc<ScriptedForwarder>, metrics: Arc<RecordingMetrics>) -> LivenessMonitor {
    LivenessMonitor::new(
      Networks::new().with_network("net", forwarder),
      Arc::new(MockDnsResolver::new()),
      metrics,
      Some(Duration::from_secs(2)),
      Handle::current(),
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_recovery_emits_single_up_transition() {
    let forwarder = Arc::new(ScriptedForwarder::new().script(
      E1,
      vec![Outcome::Respond(503), Outcome::Respond(200)],
    ));
    let metrics = Arc::new(RecordingMetrics::default());
    let monitor = monitor(forwarder.clone(), metrics.clone());
    monitor.start_monitoring(map_of(vec![monitored_group("sg", "net", &["192.0.2.1"])])).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.get_status(E1));
    assert!(monitor.is_known_down(E1));
    assert!(!monitor.get_status("sg"));

    // recovery is noticed after the down interval, then probes slow down to the up interval
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(monitor.get_status(E1));
    assert!(monitor.get_status("sg"));
    assert_eq!(metrics.element_events(E1), vec![false, true]);
    assert_eq!(metrics.group_events("sg"), vec![false, true]);
    // 1 failed probe, 1 at 5s, then every 30s
    assert_eq!(forwarder.count(E1), 5);
    monitor.stop().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_shared_element_is_probed_once() {
    let forwarder = Arc::new(
      ScriptedForwarder::new()
        .script(E1, vec![Outcome::Respond(200)])
        .script(E2, vec![Outcome::Respond(200)])
        .script(E3, vec![Outcome::Respond(200)]),
    );
    let metrics = Arc::new(RecordingMetrics::default());
    let monitor = monitor(forwarder.clone(), metrics.clone());
    monitor
      .start_monitoring(map_of(vec![
        monitored_group("a", "net", &["192.0.2.1", "192.0.2.2"]),
        monitored_group("b", "net", &["192.0.2.2", "192.0.2.3"]),
      ]))
      .await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(forwarder.count(E1), 1);
    assert_eq!(forwarder.count(E2), 1);
    assert_eq!(forwarder.count(E3), 1);
    assert_eq!(metrics.element_events(E2).len(), 1);
    // metric of the shared element is attributed to the first group
    assert!(metrics.events().iter().any(|e| e.element.as_deref() == Some(E2) && e.group == "a"));
    assert!(monitor.get_status("a") && monitor.get_status("b"));
    assert_eq!(monitor.snapshot().elements.len(), 3);
    monitor.stop().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_probe_failure_classification() {
    let forwarder = Arc::new(
      ScriptedForwarder::new()
        .script(E1, vec![Outcome::Hang])
        .script(E2, vec![Outcome::Fail(TransportError::Timeout)])
        .script(E3, vec![Outcome::Respond(486)]),
    );
    let metrics = Arc::new(RecordingMetrics::default());
    let monitor = monitor(forwarder.clone(), metrics);
    monitor
      .start_monitoring(map_of(vec![
        monitored_group("sg", "net", &["192.0.2.1", "192.0.2.2", "192.0.2.3"]),
        // no provider is registered for this network
        monitored_group("orphan", "unknown_net", &["192.0.2.4"]),
      ]))
      .await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(monitor.is_known_down(E1));
    assert!(monitor.is_known_down(E2));
    // a final response outside the failure codes proves the element alive
    assert!(monitor.get_status(E3));
    assert!(monitor.is_known_down("192.0.2.4:5060:UDP"));
    assert!(monitor.get_status("sg"));
    assert!(!monitor.get_status("orphan"));
    monitor.stop().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_restart_drops_stale_elements() {
    let forwarder = Arc::new(
      ScriptedForwarder::new()
        .script(E1, vec![Outcome::Respond(200)])
        .script(E2, vec![Outcome::Respond(200)]),
    );
    let metrics = Arc::new(RecordingMetrics::default());
    let monitor = monitor(forwarder.clone(), metrics);
    monitor
      .start_monitoring(map_of(vec![monitored_group("sg", "net", &["192.0.2.1", "192.0.2.2"])]))
      .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(monitor.get_status(E2));

    let shrunk = map_of(vec![monitored_group("sg", "net", &["192.0.2.1"])]);
    assert!(monitor.is_server_group_map_updated(&monitor.monitored_server_groups().await.unwrap(), &shrunk));
    monitor.start_monitoring(shrunk).await;
    assert!(monitor.element_status(E2).is_none());

    // the cancelled stream of E2 sends no more probes
    let probes_of_e2 = forwarder.count(E2);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(forwarder.count(E2), probes_of_e2);
    assert!(forwarder.count(E1) > 2);

    monitor.stop().await;
    assert!(monitor.snapshot().elements.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_groups_without_ping_are_not_monitored() {
    let forwarder = Arc::new(ScriptedForwarder::new().script(E1, vec![Outcome::Respond(200)]));
    let monitor = monitor(forwarder.clone(), Arc::new(RecordingMetrics::default()));
    let mut sg = monitored_group("sg", "net", &["192.0.2.1"]);
    sg.ping_on = false;
    monitor.start_monitoring(map_of(vec![sg])).await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(forwarder.count(E1), 0);
    assert!(!monitor.get_status("sg"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_result_of_replaced_generation_is_dropped() {
    let forwarder = Arc::new(
      ScriptedForwarder::new()
        .script(E1, vec![Outcome::Respond(200)])
        .script(E2, vec![Outcome::Respond(200)]),
    );
    let monitor = monitor(forwarder, Arc::new(RecordingMetrics::default()));
    let full = monitored_group("sg", "net", &["192.0.2.1", "192.0.2.2"]);
    monitor.start_monitoring(map_of(vec![full.clone()])).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    monitor
      .start_monitoring(map_of(vec![monitored_group("sg", "net", &["192.0.2.1"])]))
      .await;
    assert!(monitor.element_status(E2).is_none());

    // a stream of the first generation finishing its probe after the restart
    let stale = Topology {
      epoch: 1,
      group_elements: HashMap::from([("sg".to_string(), vec![E1.to_string(), E2.to_string()])]),
    };
    let mut target = ProbeTarget::new(&full.elements[1], &full);
    target.groups.push("sg".to_string());
    monitor.inner.record_probe(&stale, &target, false);
    assert!(monitor.element_status(E2).is_none());
    assert!(monitor.get_status("sg"));
    monitor.stop().await;
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_simultaneous_failures_bring_group_down() {
    let metrics = Arc::new(RecordingMetrics::default());
    let monitor = monitor(Arc::new(ScriptedForwarder::new()), metrics.clone());
    let sg = monitored_group("sg", "net", &["192.0.2.1", "192.0.2.2"]);
    let topology = Topology {
      epoch: 0,
      group_elements: HashMap::from([("sg".to_string(), vec![E1.to_string(), E2.to_string()])]),
    };
    let targets: Vec<ProbeTarget> = sg
      .elements
      .iter()
      .map(|e| {
        let mut target = ProbeTarget::new(e, &sg);
        target.groups.push("sg".to_string());
        target
      })
      .collect();

    let inner = monitor.inner.as_ref();
    for _ in 0..2000 {
      for target in &targets {
        inner.record_probe(&topology, target, true);
      }
      assert!(monitor.get_status("sg"));
      let barrier = std::sync::Barrier::new(targets.len());
      std::thread::scope(|s| {
        for target in &targets {
          let (barrier, topology) = (&barrier, &topology);
          s.spawn(move || {
            barrier.wait();
            inner.record_probe(topology, target, false);
          });
        }
      });
      assert!(!monitor.get_status("sg"));
    }
    // every group metric alternates, no transition is reported twice
    let events = metrics.group_events("sg");
    assert!(events.windows(2).all(|w| w[0] != w[1]));
    assert_eq!(events.last(), Some(&false));
  }
}
