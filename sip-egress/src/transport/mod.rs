mod codec;
mod udp;

pub(crate) use udp::UdpForwarder;

use sip_egress_lib::{Config, Networks};
use std::sync::Arc;

/// One UDP forwarding provider per configured network
pub(crate) fn build_networks(config: &Config) -> Networks {
  config.networks.values().fold(Networks::new(), |networks, network| {
    networks.with_network(network.name.clone(), Arc::new(UdpForwarder::new(network)))
  })
}
