use crate::{server_group::ServerGroupMap, trunk::TrunkConfig};
use std::{collections::HashMap, net::IpAddr, time::Duration};

pub mod builder;
pub mod validation;

pub use builder::ConfigBuilder;
pub use validation::{ConfigValidationError, ValidationResult};

/// Configuration of the egress router and the liveness monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Networks by name
  pub networks: HashMap<String, NetworkConfig>,
  /// Server groups by name
  pub server_groups: ServerGroupMap,
  /// Trunks by name
  pub trunks: HashMap<String, TrunkConfig>,
  /// Implicit timeout of a single OPTIONS probe
  pub probe_timeout: Duration,
  /// Interval between two fetches of the server group configuration
  pub refresh_interval: Duration,
}

/// Network over which elements are reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
  pub name: String,
  /// Local address outgoing requests are sent from
  pub bind_ip: IpAddr,
  /// Timeout of one client transaction on this network
  pub transaction_timeout: Duration,
}
