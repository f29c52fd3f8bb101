use crate::{constants::log_event_names, trace::*};

/// Receiver of liveness transitions
pub trait MetricsSink: Send + Sync {
  /// Aggregated status of a server group changed
  fn send_group_metric(&self, group_name: &str, is_up: bool);

  /// Status of an element changed, `group_name` is the group the element is probed for
  fn send_element_metric(&self, group_name: &str, element_key: &str, is_up: bool);
}

#[derive(Debug, Clone, Copy, Default)]
/// Metrics sink emitting structured log events
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
  fn send_group_metric(&self, group_name: &str, is_up: bool) {
    info!(name: log_event_names::LIVENESS, server_group = group_name, is_up, "Server group is {}", up_down(is_up));
  }

  fn send_element_metric(&self, group_name: &str, element_key: &str, is_up: bool) {
    info!(
      name: log_event_names::LIVENESS,
      server_group = group_name,
      element = element_key,
      is_up,
      "Element is {}",
      up_down(is_up)
    );
  }
}

fn up_down(is_up: bool) -> &'static str {
  if is_up { "UP" } else { "DOWN" }
}
