use super::{MonitorInner, Topology};
use crate::{
  message::{Hop, SipRequest, SipUri, Transport},
  server_group::{LivenessPolicy, ServerGroup, ServerGroupElement},
  trace::*,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One probed element key
pub(super) struct ProbeTarget {
  pub(super) key: String,
  pub(super) hop: Hop,
  /// Group whose policy drives the probes and which is named in element metrics
  pub(super) owner_group: String,
  /// Every monitored group containing the element
  pub(super) groups: Vec<String>,
  pub(super) policy: LivenessPolicy,
}

impl ProbeTarget {
  pub(super) fn new(element: &ServerGroupElement, owner: &ServerGroup) -> Self {
    Self {
      key: element.unique_key(),
      hop: Hop {
        host: element.host.clone(),
        port: element.port,
        transport: element.transport,
        network: owner.network_name.clone(),
      },
      owner_group: owner.name.clone(),
      groups: Vec::new(),
      policy: owner.liveness_policy.clone(),
    }
  }

  fn probe_request(&self) -> SipRequest {
    let mut uri = SipUri::new(self.hop.host.clone());
    uri.port = Some(self.hop.port);
    if self.hop.transport != Transport::Udp {
      uri.set_param("transport", Some(self.hop.transport.as_str().to_string()));
    }
    SipRequest::options(uri, self.policy.max_forwards)
  }
}

impl MonitorInner {
  /// Send one OPTIONS probe. Failure codes, timeouts and transport errors all count as down.
  async fn probe(&self, target: &ProbeTarget) -> bool {
    let Some(forwarder) = self.networks.get(&target.hop.network) else {
      debug!("No provider for network {}, {} is considered down", target.hop.network, target.key);
      return false;
    };
    match tokio::time::timeout(self.probe_timeout, forwarder.forward(&target.hop, target.probe_request())).await {
      Ok(Ok(response)) => {
        let is_up = !target.policy.is_failure_code(response.status);
        if !is_up {
          debug!("Probe to {} answered {}", target.hop, response.status);
        }
        is_up
      }
      Ok(Err(e)) => {
        debug!("Probe to {} failed: {e}", target.hop);
        false
      }
      Err(_) => {
        debug!("Probe to {} timed out", target.hop);
        false
      }
    }
  }
}

/// Probe loop of one element key, alive until its generation is cancelled.
/// Results that arrive after cancellation are discarded.
pub(super) async fn probe_service(
  inner: Arc<MonitorInner>,
  topology: Arc<Topology>,
  target: ProbeTarget,
  cancel_token: CancellationToken,
) {
  debug!("Start probing {}", target.hop);
  loop {
    let is_up = tokio::select! {
      is_up = inner.probe(&target) => is_up,
      _ = cancel_token.cancelled() => break,
    };
    if cancel_token.is_cancelled() {
      break;
    }
    inner.record_probe(&topology, &target, is_up);

    let interval = if is_up {
      target.policy.up_interval
    } else {
      target.policy.down_interval
    };
    tokio::select! {
      _ = tokio::time::sleep(interval) => {}
      _ = cancel_token.cancelled() => break,
    }
  }
  debug!("Stop probing {}", target.hop);
}
