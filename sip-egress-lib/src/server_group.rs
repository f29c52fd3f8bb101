//! Server group model: immutable descriptions of named destinations

use crate::{
  config::ConfigValidationError,
  constants::*,
  message::{Transport, endpoint_key},
};
use std::{
  collections::{BTreeMap, BTreeSet},
  time::Duration,
};

/// Server groups keyed by name
pub type ServerGroupMap = BTreeMap<String, ServerGroup>;

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// How the elements of a server group are obtained
pub enum ServerGroupType {
  #[default]
  /// Elements are listed in configuration
  Static,
  /// Elements are the A/AAAA records of the host name
  ARecord,
  /// Elements are the SRV records of the host name
  Srv,
}

impl TryFrom<&str> for ServerGroupType {
  type Error = ConfigValidationError;
  fn try_from(value: &str) -> Result<Self, Self::Error> {
    match value.to_ascii_lowercase().as_str() {
      "static" => Ok(Self::Static),
      "a_record" | "a" => Ok(Self::ARecord),
      "srv" => Ok(Self::Srv),
      _ => Err(ConfigValidationError::invalid_value("type", value, "expected static, a_record or srv")),
    }
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Ordering policy of elements within one priority tier
pub enum LbType {
  #[default]
  /// Weighted random draw without replacement, every element is tried once
  Weight,
  /// One weighted random element per tier, no further same-tier candidates
  Once,
  /// Stable element chosen by hashing the Call-ID of the request
  CallId,
  /// Stable element chosen by hashing a caller supplied affinity key, e.g., the call type
  Affinity,
}

impl TryFrom<&str> for LbType {
  type Error = ConfigValidationError;
  fn try_from(value: &str) -> Result<Self, Self::Error> {
    match value.to_ascii_lowercase().as_str() {
      "weight" => Ok(Self::Weight),
      "once" => Ok(Self::Once),
      "call_id" => Ok(Self::CallId),
      "affinity" => Ok(Self::Affinity),
      _ => Err(ConfigValidationError::invalid_value(
        "lb_type",
        value,
        "expected weight, once, call_id or affinity",
      )),
    }
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq)]
/// Response codes driving failover to the next candidate
pub struct FailoverPolicy {
  /// Responses with these codes are retained as failures and the next candidate is tried
  pub failover_response_codes: Vec<u16>,
  /// If set, a transport error or timeout of a candidate is mapped to a response with this code
  pub retry_response_code: Option<u16>,
}

impl Default for FailoverPolicy {
  fn default() -> Self {
    Self {
      failover_response_codes: DEFAULT_FAILOVER_RESPONSE_CODES.to_vec(),
      retry_response_code: None,
    }
  }
}

impl FailoverPolicy {
  pub fn is_failover_code(&self, status: u16) -> bool {
    self.failover_response_codes.contains(&status)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// OPTIONS probing policy
pub struct LivenessPolicy {
  /// Probe responses with these codes mark the element down
  pub failure_response_codes: Vec<u16>,
  /// Probe interval while the element is up
  pub up_interval: Duration,
  /// Probe interval while the element is down
  pub down_interval: Duration,
  /// Max-Forwards of the probes
  pub max_forwards: u8,
}

impl Default for LivenessPolicy {
  fn default() -> Self {
    Self {
      failure_response_codes: DEFAULT_LIVENESS_FAILURE_RESPONSE_CODES.to_vec(),
      up_interval: Duration::from_millis(DEFAULT_UP_INTERVAL_MSEC),
      down_interval: Duration::from_millis(DEFAULT_DOWN_INTERVAL_MSEC),
      max_forwards: DEFAULT_MAX_FORWARDS,
    }
  }
}

impl LivenessPolicy {
  pub fn is_failure_code(&self, status: u16) -> bool {
    self.failure_response_codes.contains(&status)
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// One physical endpoint. Its identity is [ServerGroupElement::unique_key], not the object.
pub struct ServerGroupElement {
  /// IP address or host name
  pub host: String,
  pub port: u16,
  pub transport: Transport,
  pub priority: u32,
  pub weight: u32,
}

impl ServerGroupElement {
  /// Element with default priority and weight
  pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
    Self {
      host: host.into(),
      port,
      transport,
      priority: DEFAULT_ELEMENT_PRIORITY,
      weight: DEFAULT_ELEMENT_WEIGHT,
    }
  }

  pub fn with_priority(mut self, priority: u32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_weight(mut self, weight: u32) -> Self {
    self.weight = weight;
    self
  }

  /// `host:port:TRANSPORT`
  pub fn unique_key(&self) -> String {
    endpoint_key(&self.host, self.port, self.transport)
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
/// A named logical destination
pub struct ServerGroup {
  #[builder(setter(into))]
  /// Server group name, unique in the configuration
  pub name: String,

  #[builder(setter(into), default = "String::new()")]
  /// Host name resolved for [ServerGroupType::ARecord] and [ServerGroupType::Srv] groups
  pub host_name: String,

  #[builder(setter(into))]
  /// Network the elements are reached through
  pub network_name: String,

  #[builder(default)]
  pub sg_type: ServerGroupType,

  #[builder(default)]
  /// Transport of elements obtained from DNS
  pub transport: Transport,

  #[builder(setter(strip_option), default)]
  /// Port of elements obtained from A records, the transport default when absent
  pub port: Option<u16>,

  #[builder(default)]
  /// Elements of a [ServerGroupType::Static] group
  pub elements: Vec<ServerGroupElement>,

  #[builder(default = "DEFAULT_ELEMENT_PRIORITY")]
  /// Group priority, lower is tried first
  pub priority: u32,

  #[builder(default = "DEFAULT_ELEMENT_WEIGHT")]
  pub weight: u32,

  #[builder(default)]
  pub lb_type: LbType,

  #[builder(default = "false")]
  /// Whether the liveness monitor probes the elements of this group
  pub ping_on: bool,

  #[builder(default)]
  pub failover_policy: FailoverPolicy,

  #[builder(default)]
  pub liveness_policy: LivenessPolicy,
}

impl ServerGroupBuilder {
  fn validate(&self) -> Result<(), String> {
    if self.name.as_ref().is_some_and(|n| n.is_empty()) {
      return Err("name is empty".to_string());
    }
    let sg_type = self.sg_type.unwrap_or_default();
    match sg_type {
      ServerGroupType::Static => {
        if self.elements.as_ref().is_none_or(|e| e.is_empty()) {
          return Err("static server group requires at least one element".to_string());
        }
      }
      ServerGroupType::ARecord | ServerGroupType::Srv => {
        if self.host_name.as_ref().is_none_or(|h| h.is_empty()) {
          return Err("dynamic server group requires host_name".to_string());
        }
      }
    }
    if let Some(policy) = &self.liveness_policy {
      if policy.up_interval.is_zero() || policy.down_interval.is_zero() {
        return Err("liveness intervals must be positive".to_string());
      }
    }
    Ok(())
  }
}

impl ServerGroup {
  /// True for groups resolved through DNS
  pub fn is_dynamic(&self) -> bool {
    !matches!(self.sg_type, ServerGroupType::Static)
  }

  /// SRV owner name of the group, e.g., `_sip._udp.example.com`
  /// A host name already starting with `_` is used as is.
  pub fn srv_name(&self) -> String {
    let host = self.host_name.trim_end_matches('.');
    if host.starts_with('_') {
      host.to_string()
    } else {
      format!("{}.{}", self.transport.srv_prefix(), host)
    }
  }

  /// Set of element keys together with their priority and weight, used for change detection
  fn element_set(&self) -> BTreeSet<(String, u32, u32)> {
    self
      .elements
      .iter()
      .map(|e| (e.unique_key(), e.priority, e.weight))
      .collect()
  }

  /// Equality on the attributes that matter to monitoring and routing. Element order is ignored.
  fn is_same_as(&self, other: &Self) -> bool {
    self.name == other.name
      && self.host_name == other.host_name
      && self.network_name == other.network_name
      && self.sg_type == other.sg_type
      && self.transport == other.transport
      && self.port == other.port
      && self.priority == other.priority
      && self.weight == other.weight
      && self.lb_type == other.lb_type
      && self.ping_on == other.ping_on
      && self.failover_policy == other.failover_policy
      && self.liveness_policy == other.liveness_policy
      && self.element_set() == other.element_set()
  }
}

/// Returns true if the new server group map differs from the old one in any group or element
pub fn is_server_group_map_updated(old: &ServerGroupMap, new: &ServerGroupMap) -> bool {
  if old.len() != new.len() {
    return true;
  }
  old.iter().any(|(name, old_sg)| match new.get(name) {
    Some(new_sg) => !old_sg.is_same_as(new_sg),
    None => true,
  })
}
