use std::time::Duration;

/// Errors that happen while resolving a dynamic server group or a redirect target
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
  /// NXDOMAIN or an empty answer
  #[error("No records found for {0}")]
  NotFound(String),

  /// Lookup failure (timeout, refused, network error)
  #[error("DNS lookup for {hostname} failed: {reason}")]
  LookupFailed { hostname: String, reason: String },

  /// Answer that cannot be turned into elements
  #[error("Malformed DNS answer for {hostname}: {reason}")]
  Malformed { hostname: String, reason: String },
}

/// Errors returned by the forwarding collaborator for one delivery attempt
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("Request timed out")]
  Timeout,

  /// The network named by the hop has no registered provider
  #[error("No provider for network: {0}")]
  NoProviderForNetwork(String),

  #[error("Transport {0} is not supported by this provider")]
  UnsupportedTransport(String),

  #[error("Failed to resolve destination: {0}")]
  Unresolvable(String),

  #[error("IO error: {0}")]
  Io(String),

  #[error("Invalid response: {0}")]
  InvalidResponse(String),
}

impl From<std::io::Error> for TransportError {
  fn from(e: std::io::Error) -> Self {
    Self::Io(e.to_string())
  }
}

/// Errors surfaced by an egress call instead of a final response
#[derive(thiserror::Error, Debug)]
pub enum EgressError {
  /* --------------------------------------- */
  /// Missing network or server group wiring; fatal for the call
  #[error("Configuration error: {0}")]
  Configuration(String),

  /* --------------------------------------- */
  /// The overall response timeout elapsed before any response or mapped error was captured
  #[error("No response captured within the overall timeout of {0:?}")]
  Timeout(Duration),

  /// Every candidate failed at the transport level and no response code was mapped for it
  #[error("All candidates failed, last error: {0}")]
  Transport(#[from] TransportError),

  /// Every server group failed DNS resolution
  #[error("No candidates could be resolved: {0}")]
  Dns(#[from] DnsError),

  /// Server groups resolved to zero elements
  #[error("No candidate endpoint available for the trunk")]
  NoCandidates,
}

impl EgressError {
  pub(crate) fn configuration(msg: impl Into<String>) -> Self {
    Self::Configuration(msg.into())
  }
}

/// Errors that happen while parsing SIP values handed over by the transport collaborator
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
  #[error("Invalid SIP URI: {0}")]
  InvalidUri(String),

  #[error("Invalid Contact: {0}")]
  InvalidContact(String),

  #[error("Invalid transport: {0}")]
  InvalidTransport(String),
}
