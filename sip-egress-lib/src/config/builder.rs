use crate::{
  config::{Config, NetworkConfig, validation::*},
  constants::{CONFIG_REFRESH_INTERVAL_SEC, DEFAULT_PROBE_TIMEOUT_MSEC},
  server_group::{ServerGroup, ServerGroupMap},
  trunk::TrunkConfig,
};
use std::{collections::HashMap, time::Duration};

/// Builder for creating configurations with validation
#[derive(Debug, Default)]
pub struct ConfigBuilder {
  networks: HashMap<String, NetworkConfig>,
  server_groups: ServerGroupMap,
  trunks: HashMap<String, TrunkConfig>,
  probe_timeout: Option<Duration>,
  refresh_interval: Option<Duration>,
}

impl ConfigBuilder {
  /// Create a new configuration builder
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a network
  pub fn with_network(mut self, network: NetworkConfig) -> Result<Self, ConfigValidationError> {
    if network.name.is_empty() {
      return Err(ConfigValidationError::MissingRequiredField {
        field: "network.name".to_string(),
      });
    }
    BasicConfigValidator::validate_positive_duration("transaction_timeout", network.transaction_timeout)?;
    if self.networks.contains_key(&network.name) {
      return Err(ConfigValidationError::ConflictingConfiguration {
        reason: format!("network '{}' is defined twice", network.name),
      });
    }
    self.networks.insert(network.name.clone(), network);
    Ok(self)
  }

  /// Add a server group
  pub fn with_server_group(mut self, server_group: ServerGroup) -> Result<Self, ConfigValidationError> {
    ServerGroupValidator::validate_server_group(&server_group)?;
    if self.server_groups.contains_key(&server_group.name) {
      return Err(ConfigValidationError::ConflictingConfiguration {
        reason: format!("server group '{}' is defined twice", server_group.name),
      });
    }
    self.server_groups.insert(server_group.name.clone(), server_group);
    Ok(self)
  }

  /// Add a trunk. Its server groups are checked at [ConfigBuilder::build].
  pub fn with_trunk(mut self, trunk: TrunkConfig) -> Result<Self, ConfigValidationError> {
    if self.trunks.contains_key(&trunk.name) {
      return Err(ConfigValidationError::ConflictingConfiguration {
        reason: format!("trunk '{}' is defined twice", trunk.name),
      });
    }
    self.trunks.insert(trunk.name.clone(), trunk);
    Ok(self)
  }

  /// Set the implicit OPTIONS probe timeout
  pub fn with_probe_timeout(mut self, timeout: Duration) -> Result<Self, ConfigValidationError> {
    BasicConfigValidator::validate_positive_duration("probe_timeout", timeout)?;
    self.probe_timeout = Some(timeout);
    Ok(self)
  }

  /// Set the server group refresh interval
  pub fn with_refresh_interval(mut self, interval: Duration) -> Result<Self, ConfigValidationError> {
    BasicConfigValidator::validate_positive_duration("refresh_interval", interval)?;
    self.refresh_interval = Some(interval);
    Ok(self)
  }

  /// Build the final configuration, checking references between networks, server groups and trunks
  pub fn build(self) -> Result<Config, ConfigValidationError> {
    for sg in self.server_groups.values() {
      if !self.networks.contains_key(&sg.network_name) {
        return Err(ConfigValidationError::UnknownReference {
          kind: "network".to_string(),
          name: sg.network_name.clone(),
          referenced_by: sg.name.clone(),
        });
      }
    }
    for trunk in self.trunks.values() {
      TrunkValidator::validate_trunk(trunk, &self.server_groups)?;
    }

    Ok(Config {
      networks: self.networks,
      server_groups: self.server_groups,
      trunks: self.trunks,
      probe_timeout: self
        .probe_timeout
        .unwrap_or(Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MSEC)),
      refresh_interval: self
        .refresh_interval
        .unwrap_or(Duration::from_secs(CONFIG_REFRESH_INTERVAL_SEC)),
    })
  }
}
