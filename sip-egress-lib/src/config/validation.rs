use crate::{
  message::endpoint_key,
  server_group::{ServerGroup, ServerGroupMap, ServerGroupType},
  trunk::TrunkConfig,
};
use std::{collections::HashSet, fmt::Display, time::Duration};

/// Validation errors specific to configuration
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
  #[error("Missing required field: {field}")]
  MissingRequiredField { field: String },

  #[error("Invalid value for field {field}: {value}. {reason}")]
  InvalidFieldValue { field: String, value: String, reason: String },

  #[error("Server group validation error for '{name}': {reason}")]
  ServerGroupValidationError { name: String, reason: String },

  #[error("Trunk validation error for '{name}': {reason}")]
  TrunkValidationError { name: String, reason: String },

  #[error("Unknown {kind} '{name}' referenced by '{referenced_by}'")]
  UnknownReference {
    kind: String,
    name: String,
    referenced_by: String,
  },

  #[error("Conflicting configuration: {reason}")]
  ConflictingConfiguration { reason: String },
}

impl ConfigValidationError {
  pub(crate) fn invalid_value(field: &str, value: impl Display, reason: &str) -> Self {
    Self::InvalidFieldValue {
      field: field.to_string(),
      value: value.to_string(),
      reason: reason.to_string(),
    }
  }

  fn server_group(name: &str, reason: impl Into<String>) -> Self {
    Self::ServerGroupValidationError {
      name: name.to_string(),
      reason: reason.into(),
    }
  }

  fn trunk(name: &str, reason: impl Into<String>) -> Self {
    Self::TrunkValidationError {
      name: name.to_string(),
      reason: reason.into(),
    }
  }
}

/// Result type for configuration validation
pub type ValidationResult<T> = Result<T, ConfigValidationError>;

/// Validator for basic configuration fields
pub struct BasicConfigValidator;

impl BasicConfigValidator {
  /// Validate a timeout or interval that must be positive
  pub fn validate_positive_duration(field: &str, value: Duration) -> ValidationResult<()> {
    if value.is_zero() {
      return Err(ConfigValidationError::invalid_value(
        field,
        format!("{value:?}"),
        "Duration must be greater than 0",
      ));
    }
    if value > Duration::from_secs(3600) {
      crate::trace::warn!("{} is very large ({:?})", field, value);
    }
    Ok(())
  }
}

/// Validator for server groups
pub struct ServerGroupValidator;

impl ServerGroupValidator {
  /// Validate a single server group, independent of the rest of the configuration
  pub fn validate_server_group(sg: &ServerGroup) -> ValidationResult<()> {
    if sg.name.is_empty() {
      return Err(ConfigValidationError::MissingRequiredField {
        field: "server_group.name".to_string(),
      });
    }
    if sg.network_name.is_empty() {
      return Err(ConfigValidationError::server_group(&sg.name, "network is required"));
    }

    match sg.sg_type {
      ServerGroupType::Static => {
        if sg.elements.is_empty() {
          return Err(ConfigValidationError::server_group(
            &sg.name,
            "static server group requires at least one element",
          ));
        }
        let mut keys = HashSet::new();
        for element in &sg.elements {
          if element.host.is_empty() || element.port == 0 {
            return Err(ConfigValidationError::server_group(
              &sg.name,
              format!("invalid element {}", endpoint_key(&element.host, element.port, element.transport)),
            ));
          }
          if !keys.insert(element.unique_key()) {
            return Err(ConfigValidationError::server_group(
              &sg.name,
              format!("duplicated element {}", element.unique_key()),
            ));
          }
        }
      }
      ServerGroupType::ARecord | ServerGroupType::Srv => {
        if sg.host_name.is_empty() {
          return Err(ConfigValidationError::server_group(
            &sg.name,
            "dynamic server group requires host_name",
          ));
        }
        if !sg.elements.is_empty() {
          crate::trace::warn!(
            "Server group '{}' is resolved by DNS, its configured elements are ignored",
            sg.name
          );
        }
      }
    }

    for code in sg
      .failover_policy
      .failover_response_codes
      .iter()
      .chain(sg.failover_policy.retry_response_code.iter())
      .chain(sg.liveness_policy.failure_response_codes.iter())
    {
      if !(300..700).contains(code) {
        return Err(ConfigValidationError::server_group(
          &sg.name,
          format!("response code {code} is not a final non-2xx code"),
        ));
      }
    }

    BasicConfigValidator::validate_positive_duration("up_interval", sg.liveness_policy.up_interval)?;
    BasicConfigValidator::validate_positive_duration("down_interval", sg.liveness_policy.down_interval)?;
    if sg.liveness_policy.max_forwards == 0 {
      return Err(ConfigValidationError::server_group(&sg.name, "max_forwards cannot be 0"));
    }
    Ok(())
  }
}

/// Validator for trunks
pub struct TrunkValidator;

impl TrunkValidator {
  /// Validate a trunk against the server groups it references
  pub fn validate_trunk(trunk: &TrunkConfig, server_groups: &ServerGroupMap) -> ValidationResult<()> {
    if trunk.name.is_empty() {
      return Err(ConfigValidationError::MissingRequiredField {
        field: "trunk.name".to_string(),
      });
    }
    if trunk.server_groups.is_empty() {
      return Err(ConfigValidationError::trunk(&trunk.name, "at least one server group is required"));
    }
    for sg_name in &trunk.server_groups {
      if !server_groups.contains_key(sg_name) {
        return Err(ConfigValidationError::UnknownReference {
          kind: "server group".to_string(),
          name: sg_name.clone(),
          referenced_by: trunk.name.clone(),
        });
      }
    }
    BasicConfigValidator::validate_positive_duration("overall_timeout", trunk.policy.overall_timeout)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    message::Transport,
    server_group::{ServerGroupBuilder, ServerGroupElement},
    trunk::TrunkKind,
  };

  fn static_group(name: &str) -> ServerGroup {
    ServerGroupBuilder::default()
      .name(name)
      .network_name("net")
      .elements(vec![ServerGroupElement::new("192.0.2.1", 5060, Transport::Udp)])
      .build()
      .unwrap()
  }

  #[test]
  fn test_duplicated_element_is_rejected() {
    let mut sg = static_group("sg");
    sg.elements.push(ServerGroupElement::new("192.0.2.1", 5060, Transport::Udp));
    assert!(matches!(
      ServerGroupValidator::validate_server_group(&sg),
      Err(ConfigValidationError::ServerGroupValidationError { .. })
    ));
  }

  #[test]
  fn test_success_code_is_not_failover_code() {
    let mut sg = static_group("sg");
    sg.failover_policy.failover_response_codes.push(200);
    assert!(ServerGroupValidator::validate_server_group(&sg).is_err());
  }

  #[test]
  fn test_trunk_references() {
    let mut map = ServerGroupMap::new();
    map.insert("sg".to_string(), static_group("sg"));
    let trunk = TrunkConfig::new("pstn", TrunkKind::Pstn, vec!["sg".to_string()]);
    assert!(TrunkValidator::validate_trunk(&trunk, &map).is_ok());

    let trunk = TrunkConfig::new("pstn", TrunkKind::Pstn, vec!["missing".to_string()]);
    assert!(matches!(
      TrunkValidator::validate_trunk(&trunk, &map),
      Err(ConfigValidationError::UnknownReference { .. })
    ));

    let trunk = TrunkConfig::new("pstn", TrunkKind::Pstn, vec![]);
    assert!(TrunkValidator::validate_trunk(&trunk, &map).is_err());
  }
}
