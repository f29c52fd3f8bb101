use crate::{
  constants::{DEFAULT_BIND_IP, DEFAULT_TRANSACTION_TIMEOUT},
  log::warn,
};
use anyhow::anyhow;
use serde::Deserialize;
use sip_egress_lib::{
  Config, FailoverPolicy, LbType, LivenessPolicy, NetworkConfig, ServerGroup, ServerGroupBuilder, ServerGroupElement,
  ServerGroupType, Transport, TrunkConfig, TrunkKind,
  config::ConfigBuilder,
};
use std::{
  collections::{HashMap, HashSet},
  fs,
  net::IpAddr,
  time::Duration,
};

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ConfigToml {
  /// Implicit timeout of one OPTIONS probe
  pub probe_timeout: Option<String>,
  /// Interval between two checks of the server group configuration
  pub refresh_interval: Option<String>,
  pub networks: Option<HashMap<String, NetworkToml>>,
  pub server_groups: Option<HashMap<String, ServerGroupToml>>,
  pub trunks: Option<HashMap<String, TrunkToml>>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct NetworkToml {
  pub bind_ip: Option<String>,
  pub transaction_timeout: Option<String>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ServerGroupToml {
  pub network: Option<String>,
  /// static, a_record or srv
  #[serde(rename = "type")]
  pub sg_type: Option<String>,
  /// Only dynamic groups
  pub host_name: Option<String>,
  /// Only dynamic groups
  pub transport: Option<String>,
  /// Only a_record groups
  pub port: Option<u16>,
  /// Only static groups
  pub elements: Option<Vec<ElementToml>>,
  pub priority: Option<u32>,
  pub weight: Option<u32>,
  pub lb_type: Option<String>,
  pub ping: Option<bool>,
  pub failover_response_codes: Option<Vec<u16>>,
  pub retry_response_code: Option<u16>,
  pub liveness_failure_response_codes: Option<Vec<u16>>,
  pub up_interval: Option<String>,
  pub down_interval: Option<String>,
  pub max_forwards: Option<u8>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ElementToml {
  pub host: String,
  pub port: Option<u16>,
  pub transport: Option<String>,
  pub priority: Option<u32>,
  pub weight: Option<u32>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct TrunkToml {
  /// pstn, b2b or calling
  pub kind: Option<String>,
  pub server_groups: Option<Vec<String>>,
  /// Overrides the default of the kind
  pub follow_redirects: Option<bool>,
  pub overall_timeout: Option<String>,
  pub skip_down_elements: Option<bool>,
}

impl ConfigToml {
  pub fn new(config_file: &str) -> Result<Self, anyhow::Error> {
    let config_str = fs::read_to_string(config_file)?;
    Self::parse(&config_str)
  }

  fn parse(config_str: &str) -> Result<Self, anyhow::Error> {
    // Check unused fields during deserialization
    let t = toml::de::Deserializer::new(config_str);
    let mut unused = HashSet::new();

    let res = serde_ignored::deserialize(t, |path| {
      unused.insert(path.to_string());
    })
    .map_err(|e| anyhow::anyhow!(e));

    if !unused.is_empty() {
      let str = unused.iter().fold(String::new(), |acc, x| acc + x + "\n");
      warn!("Configuration file contains unsupported fields. Check typos:\n{}", str);
    }

    res
  }
}

impl TryFrom<ConfigToml> for Config {
  type Error = anyhow::Error;

  fn try_from(config_toml: ConfigToml) -> Result<Self, Self::Error> {
    let mut builder = ConfigBuilder::new();

    if let Some(probe_timeout) = config_toml.probe_timeout.as_deref() {
      builder = builder
        .with_probe_timeout(parse_duration(probe_timeout)?)
        .map_err(|e| anyhow!("Invalid probe timeout: {}", e))?;
    }
    if let Some(refresh_interval) = config_toml.refresh_interval.as_deref() {
      builder = builder
        .with_refresh_interval(parse_duration(refresh_interval)?)
        .map_err(|e| anyhow!("Invalid refresh interval: {}", e))?;
    }

    let Some(networks) = config_toml.networks else {
      return Err(anyhow!("at least one network is required"));
    };
    for (name, network_toml) in networks {
      let bind_ip: IpAddr = network_toml
        .bind_ip
        .as_deref()
        .unwrap_or(DEFAULT_BIND_IP)
        .parse()
        .map_err(|e| anyhow!("Invalid bind_ip for network '{}': {}", name, e))?;
      let transaction_timeout =
        parse_duration(network_toml.transaction_timeout.as_deref().unwrap_or(DEFAULT_TRANSACTION_TIMEOUT))?;
      builder = builder
        .with_network(NetworkConfig {
          name,
          bind_ip,
          transaction_timeout,
        })
        .map_err(|e| anyhow!("Failed to add network: {}", e))?;
    }

    for (name, sg_toml) in config_toml.server_groups.unwrap_or_default() {
      let server_group = server_group_from_toml(&name, sg_toml)?;
      builder = builder
        .with_server_group(server_group)
        .map_err(|e| anyhow!("Failed to add server group: {}", e))?;
    }

    for (name, trunk_toml) in config_toml.trunks.unwrap_or_default() {
      let Some(kind) = trunk_toml.kind.as_deref() else {
        return Err(anyhow!("kind is required for trunk: {name}"));
      };
      let kind = TrunkKind::try_from(kind)?;
      let mut trunk = TrunkConfig::new(name, kind, trunk_toml.server_groups.unwrap_or_default());
      if let Some(follow_redirects) = trunk_toml.follow_redirects {
        trunk.policy.follow_redirects = follow_redirects;
      }
      if let Some(overall_timeout) = trunk_toml.overall_timeout.as_deref() {
        trunk.policy.overall_timeout = parse_duration(overall_timeout)?;
      }
      if let Some(skip_down_elements) = trunk_toml.skip_down_elements {
        trunk.policy.skip_down_elements = skip_down_elements;
      }
      builder = builder
        .with_trunk(trunk)
        .map_err(|e| anyhow!("Failed to add trunk: {}", e))?;
    }

    // Build the final configuration with validation
    builder.build().map_err(|e| anyhow!("Configuration validation failed: {}", e))
  }
}

fn server_group_from_toml(name: &str, sg_toml: ServerGroupToml) -> Result<ServerGroup, anyhow::Error> {
  let Some(network) = sg_toml.network else {
    return Err(anyhow!("network is required for server group: {name}"));
  };
  let sg_type = sg_toml
    .sg_type
    .as_deref()
    .map(ServerGroupType::try_from)
    .transpose()?
    .unwrap_or_default();
  let transport = sg_toml
    .transport
    .as_deref()
    .map(Transport::try_from)
    .transpose()
    .map_err(|e| anyhow!("Invalid transport for server group '{}': {}", name, e))?
    .unwrap_or_default();

  let elements = sg_toml
    .elements
    .unwrap_or_default()
    .into_iter()
    .map(|e| {
      let transport = e
        .transport
        .as_deref()
        .map(Transport::try_from)
        .transpose()
        .map_err(|err| anyhow!("Invalid transport of element {} in '{}': {}", e.host, name, err))?
        .unwrap_or_default();
      let mut element = ServerGroupElement::new(e.host, e.port.unwrap_or(transport.default_port()), transport);
      if let Some(priority) = e.priority {
        element = element.with_priority(priority);
      }
      if let Some(weight) = e.weight {
        element = element.with_weight(weight);
      }
      Ok(element)
    })
    .collect::<Result<Vec<_>, anyhow::Error>>()?;

  let mut failover_policy = FailoverPolicy::default();
  if let Some(codes) = sg_toml.failover_response_codes {
    failover_policy.failover_response_codes = codes;
  }
  failover_policy.retry_response_code = sg_toml.retry_response_code;

  let mut liveness_policy = LivenessPolicy::default();
  if let Some(codes) = sg_toml.liveness_failure_response_codes {
    liveness_policy.failure_response_codes = codes;
  }
  if let Some(up_interval) = sg_toml.up_interval.as_deref() {
    liveness_policy.up_interval = parse_duration(up_interval)?;
  }
  if let Some(down_interval) = sg_toml.down_interval.as_deref() {
    liveness_policy.down_interval = parse_duration(down_interval)?;
  }
  if let Some(max_forwards) = sg_toml.max_forwards {
    liveness_policy.max_forwards = max_forwards;
  }

  let mut builder = ServerGroupBuilder::default();
  builder
    .name(name)
    .network_name(network)
    .sg_type(sg_type)
    .transport(transport)
    .elements(elements)
    .lb_type(
      sg_toml
        .lb_type
        .as_deref()
        .map(LbType::try_from)
        .transpose()?
        .unwrap_or_default(),
    )
    .ping_on(sg_toml.ping.unwrap_or(false))
    .failover_policy(failover_policy)
    .liveness_policy(liveness_policy);
  if let Some(host_name) = sg_toml.host_name {
    builder.host_name(host_name);
  }
  if let Some(port) = sg_toml.port {
    builder.port(port);
  }
  if let Some(priority) = sg_toml.priority {
    builder.priority(priority);
  }
  if let Some(weight) = sg_toml.weight {
    builder.weight(weight);
  }
  builder
    .build()
    .map_err(|e| anyhow!("Failed to build server group '{}': {}", name, e))
}

/// Parse duration string like "500ms", "30s", "5m", "1h" into Duration
fn parse_duration(s: &str) -> Result<Duration, anyhow::Error> {
  let s = s.trim();
  if s.is_empty() {
    return Err(anyhow!("Empty duration string"));
  }

  let (num_part, unit_part) = if let Some(pos) = s.find(|c: char| c.is_alphabetic()) {
    (&s[..pos], &s[pos..])
  } else {
    return Err(anyhow!("Duration must include a unit (ms, s, m, h)"));
  };

  let num: u64 = num_part
    .trim()
    .parse()
    .map_err(|_| anyhow!("Invalid number in duration: {}", num_part))?;

  let duration = match unit_part.to_lowercase().as_str() {
    "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => Duration::from_millis(num),
    "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(num),
    "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(num * 60),
    "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs(num * 3600),
    _ => return Err(anyhow!("Invalid duration unit: {}. Use ms, s, m, or h", unit_part)),
  };

  Ok(duration)
}
