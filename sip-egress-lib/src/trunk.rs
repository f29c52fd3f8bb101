use crate::{config::ConfigValidationError, constants::DEFAULT_OVERALL_TIMEOUT_MSEC};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Kind of trunk. Kinds differ in redirect handling only; normalization is plugged separately.
pub enum TrunkKind {
  /// PSTN gateways
  Pstn,
  /// Business-to-business partner, receives 3xx verbatim
  B2b,
  /// Internal calling core
  Calling,
}

impl TryFrom<&str> for TrunkKind {
  type Error = ConfigValidationError;
  fn try_from(value: &str) -> Result<Self, Self::Error> {
    match value.to_ascii_lowercase().as_str() {
      "pstn" => Ok(Self::Pstn),
      "b2b" => Ok(Self::B2b),
      "calling" => Ok(Self::Calling),
      _ => Err(ConfigValidationError::invalid_value(
        "kind",
        value,
        "expected pstn, b2b or calling",
      )),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Egress behavior of a trunk
pub struct TrunkPolicy {
  /// Follow 3xx contacts, otherwise the 3xx is the final response
  pub follow_redirects: bool,
  /// Deadline of one egress call
  pub overall_timeout: Duration,
  /// Skip elements the liveness monitor knows to be down
  pub skip_down_elements: bool,
}

impl TrunkPolicy {
  /// Default policy of a trunk kind
  pub fn for_kind(kind: TrunkKind) -> Self {
    Self {
      follow_redirects: !matches!(kind, TrunkKind::B2b),
      overall_timeout: Duration::from_millis(DEFAULT_OVERALL_TIMEOUT_MSEC),
      skip_down_elements: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A configured logical destination for outbound calls
pub struct TrunkConfig {
  pub name: String,
  pub kind: TrunkKind,
  /// Server groups backing the trunk, in configuration order
  pub server_groups: Vec<String>,
  pub policy: TrunkPolicy,
}

impl TrunkConfig {
  /// Trunk with the default policy of its kind
  pub fn new(name: impl Into<String>, kind: TrunkKind, server_groups: Vec<String>) -> Self {
    Self {
      name: name.into(),
      kind,
      server_groups,
      policy: TrunkPolicy::for_kind(kind),
    }
  }

  pub fn with_policy(mut self, policy: TrunkPolicy) -> Self {
    self.policy = policy;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_policies() {
    assert!(TrunkPolicy::for_kind(TrunkKind::Pstn).follow_redirects);
    assert!(TrunkPolicy::for_kind(TrunkKind::Calling).follow_redirects);
    assert!(!TrunkPolicy::for_kind(TrunkKind::B2b).follow_redirects);
    assert!(TrunkKind::try_from("B2B").is_ok());
    assert!(TrunkKind::try_from("sip").is_err());
  }
}
