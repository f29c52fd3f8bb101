pub mod config;
mod constants;
mod dns;
mod egress;
mod error;
mod forward;
mod liveness;
mod load_balance;
mod message;
mod metrics;
mod network;
mod server_group;
mod trace;
mod trunk;

#[cfg(test)]
mod test_util;

pub use config::{Config, ConfigBuilder, ConfigValidationError, NetworkConfig};
pub use constants::{
  CONFIG_REFRESH_INTERVAL_SEC, DEFAULT_DOWN_INTERVAL_MSEC, DEFAULT_MAX_FORWARDS, DEFAULT_OVERALL_TIMEOUT_MSEC,
  DEFAULT_PROBE_TIMEOUT_MSEC, DEFAULT_UP_INTERVAL_MSEC, log_event_names,
};
pub use dns::{DnsResolver, HickoryDnsResolver, MockDnsResolver, SrvRecord, resolve_elements, resolve_uri};
pub use egress::{EgressEngine, EgressEngineBuilder};
pub use error::{DnsError, EgressError, ParseError, TransportError};
pub use forward::{NoopNormalizer, Normalizer, ProxyForwarder};
pub use liveness::{LivenessMonitor, LivenessSnapshot, ServerGroupSource, Status};
pub use load_balance::LoadBalancer;
pub use message::{
  Contact, Headers, Hop, SipRequest, SipResponse, SipUri, Transport, endpoint_key, random_token,
  reason_phrase,
};
pub use metrics::{MetricsSink, TracingMetricsSink};
pub use network::Networks;
pub use server_group::{
  FailoverPolicy, LbType, LivenessPolicy, ServerGroup, ServerGroupBuilder, ServerGroupElement, ServerGroupMap,
  ServerGroupType, is_server_group_map_updated,
};
pub use trunk::{TrunkConfig, TrunkKind, TrunkPolicy};
