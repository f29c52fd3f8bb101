//! DNS resolution of dynamic server groups and redirect targets
//!
//! The resolver trait only exposes the two primitive lookups; turning answers into
//! [ServerGroupElement]s is done here so that every resolver behaves the same.

use crate::{
  error::DnsError,
  message::{SipUri, Transport},
  server_group::{ServerGroup, ServerGroupElement, ServerGroupType},
  trace::*,
};
use std::{collections::HashMap, net::IpAddr};

#[derive(Debug, Clone, PartialEq, Eq)]
/// One SRV answer
pub struct SrvRecord {
  pub priority: u16,
  pub weight: u16,
  pub port: u16,
  /// Target host name, possibly with a trailing dot
  pub target: String,
}

/// Trait for DNS resolution strategies
#[async_trait::async_trait]
pub trait DnsResolver: Send + Sync {
  /// Look up the SRV records of an owner name like `_sip._udp.example.com`
  async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>, DnsError>;

  /// Look up the addresses of a host name
  async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// Resolve a server group into concrete elements.
/// Static groups return their configured elements without touching DNS.
pub async fn resolve_elements(
  resolver: &dyn DnsResolver,
  server_group: &ServerGroup,
) -> Result<Vec<ServerGroupElement>, DnsError> {
  match server_group.sg_type {
    ServerGroupType::Static => Ok(server_group.elements.clone()),
    ServerGroupType::ARecord => {
      let host = strip_trailing_dot(&server_group.host_name);
      let port = server_group.port.unwrap_or(server_group.transport.default_port());
      let addrs = resolver.lookup_ip(host).await?;
      if addrs.is_empty() {
        return Err(DnsError::NotFound(host.to_string()));
      }
      debug!("Resolved {} A records for server group {}", addrs.len(), server_group.name);
      Ok(
        addrs
          .into_iter()
          .map(|ip| {
            ServerGroupElement::new(ip.to_string(), port, server_group.transport)
              .with_priority(server_group.priority)
              .with_weight(server_group.weight)
          })
          .collect(),
      )
    }
    ServerGroupType::Srv => {
      let name = server_group.srv_name();
      let elements = srv_to_elements(&name, resolver.lookup_srv(&name).await?, server_group.transport)?;
      debug!("Resolved {} SRV records for server group {}", elements.len(), server_group.name);
      Ok(elements)
    }
  }
}

/// Resolve the URI of a redirect contact into elements, following RFC 3263 loosely:
/// a literal IP or an explicit port is used directly, otherwise SRV is tried first,
/// then the host name itself with the transport default port.
pub async fn resolve_uri(resolver: &dyn DnsResolver, uri: &SipUri) -> Result<Vec<ServerGroupElement>, DnsError> {
  let transport = uri.transport();
  let host = strip_trailing_dot(&uri.host);
  if uri.is_numeric_host() || uri.port.is_some() {
    let port = uri.port.unwrap_or(transport.default_port());
    return Ok(vec![ServerGroupElement::new(host, port, transport)]);
  }

  let srv_name = format!("{}.{}", transport.srv_prefix(), host);
  match resolver.lookup_srv(&srv_name).await {
    Ok(records) if !records.is_empty() => return srv_to_elements(&srv_name, records, transport),
    Ok(_) => debug!("No SRV records for {srv_name}, falling back to the host name"),
    Err(e) => debug!("SRV lookup for {srv_name} failed ({e}), falling back to the host name"),
  }
  Ok(vec![ServerGroupElement::new(host, transport.default_port(), transport)])
}

fn srv_to_elements(
  name: &str,
  records: Vec<SrvRecord>,
  transport: Transport,
) -> Result<Vec<ServerGroupElement>, DnsError> {
  if records.is_empty() {
    return Err(DnsError::NotFound(name.to_string()));
  }
  records
    .into_iter()
    .map(|r| {
      let target = strip_trailing_dot(&r.target);
      // "." as target means the service is decidedly not available
      if target.is_empty() {
        return Err(DnsError::Malformed {
          hostname: name.to_string(),
          reason: "SRV target is the root domain".to_string(),
        });
      }
      Ok(
        ServerGroupElement::new(target, r.port, transport)
          .with_priority(r.priority as u32)
          .with_weight(r.weight as u32),
      )
    })
    .collect()
}

fn strip_trailing_dot(host: &str) -> &str {
  host.strip_suffix('.').unwrap_or(host)
}

/* ---------------------------------------------------------- */
/// Resolver backed by hickory-resolver with the system configuration
pub struct HickoryDnsResolver {
  inner: hickory_resolver::TokioResolver,
}

impl HickoryDnsResolver {
  /// Create a resolver from `/etc/resolv.conf` or the platform equivalent
  pub fn try_new() -> Result<Self, DnsError> {
    let inner = hickory_resolver::TokioResolver::builder_tokio()
      .map_err(|e| DnsError::LookupFailed {
        hostname: String::new(),
        reason: format!("Failed to read system resolver configuration: {e}"),
      })?
      .build();
    Ok(Self { inner })
  }
}

#[async_trait::async_trait]
impl DnsResolver for HickoryDnsResolver {
  async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>, DnsError> {
    let lookup = self.inner.srv_lookup(name).await.map_err(|e| DnsError::LookupFailed {
      hostname: name.to_string(),
      reason: e.to_string(),
    })?;
    Ok(
      lookup
        .iter()
        .map(|srv| SrvRecord {
          priority: srv.priority(),
          weight: srv.weight(),
          port: srv.port(),
          target: srv.target().to_utf8(),
        })
        .collect(),
    )
  }

  async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
    let lookup = self.inner.lookup_ip(host).await.map_err(|e| DnsError::LookupFailed {
      hostname: host.to_string(),
      reason: e.to_string(),
    })?;
    Ok(lookup.iter().collect())
  }
}

/* ---------------------------------------------------------- */
/// Mock DNS resolver for testing
#[derive(Default)]
pub struct MockDnsResolver {
  srv: HashMap<String, Vec<SrvRecord>>,
  ip: HashMap<String, Vec<IpAddr>>,
}

impl MockDnsResolver {
  /// Create a new mock DNS resolver
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a mock SRV answer for an owner name
  pub fn add_srv(&mut self, name: &str, records: Vec<SrvRecord>) {
    self.srv.insert(name.to_string(), records);
  }

  /// Add a mock address answer for a host name
  pub fn add_ip(&mut self, host: &str, addrs: Vec<IpAddr>) {
    self.ip.insert(host.to_string(), addrs);
  }
}

#[async_trait::async_trait]
impl DnsResolver for MockDnsResolver {
  async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>, DnsError> {
    self
      .srv
      .get(name)
      .cloned()
      .ok_or_else(|| DnsError::NotFound(name.to_string()))
  }

  async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
    self
      .ip
      .get(host)
      .cloned()
      .ok_or_else(|| DnsError::NotFound(host.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::server_group::ServerGroupBuilder;

  fn srv(priority: u16, weight: u16, port: u16, target: &str) -> SrvRecord {
    SrvRecord {
      priority,
      weight,
      port,
      target: target.to_string(),
    }
  }

  #[tokio::test]
  async fn test_resolve_static_group() {
    let sg = ServerGroupBuilder::default()
      .name("static")
      .network_name("net")
      .elements(vec![ServerGroupElement::new("192.0.2.1", 5060, Transport::Udp)])
      .build()
      .unwrap();
    let resolver = MockDnsResolver::new();
    let elements = resolve_elements(&resolver, &sg).await.unwrap();
    assert_eq!(elements, sg.elements);
  }

  #[tokio::test]
  async fn test_resolve_srv_group() {
    let mut resolver = MockDnsResolver::new();
    resolver.add_srv(
      "_sip._tcp.pstn.example.com",
      vec![srv(10, 60, 5070, "gw1.example.com."), srv(20, 40, 5080, "gw2.example.com.")],
    );
    let sg = ServerGroupBuilder::default()
      .name("pstn")
      .network_name("net")
      .sg_type(ServerGroupType::Srv)
      .host_name("pstn.example.com")
      .transport(Transport::Tcp)
      .build()
      .unwrap();
    let elements = resolve_elements(&resolver, &sg).await.unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].unique_key(), "gw1.example.com:5070:TCP");
    assert_eq!(elements[0].priority, 10);
    assert_eq!(elements[0].weight, 60);
    assert_eq!(elements[1].unique_key(), "gw2.example.com:5080:TCP");
  }

  #[tokio::test]
  async fn test_resolve_a_record_group() {
    let mut resolver = MockDnsResolver::new();
    resolver.add_ip(
      "b2b.example.com",
      vec!["192.0.2.1".parse().unwrap(), "192.0.2.2".parse().unwrap()],
    );
    let sg = ServerGroupBuilder::default()
      .name("b2b")
      .network_name("net")
      .sg_type(ServerGroupType::ARecord)
      .host_name("b2b.example.com.")
      .port(5090)
      .priority(5)
      .weight(50)
      .build()
      .unwrap();
    let elements = resolve_elements(&resolver, &sg).await.unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[1].unique_key(), "192.0.2.2:5090:UDP");
    assert_eq!(elements[1].priority, 5);
    assert_eq!(elements[1].weight, 50);
  }

  #[tokio::test]
  async fn test_resolve_failures() {
    let mut resolver = MockDnsResolver::new();
    resolver.add_srv("_sip._udp.dead.example.com", vec![srv(0, 0, 0, ".")]);
    let sg = |host: &str| {
      ServerGroupBuilder::default()
        .name("dyn")
        .network_name("net")
        .sg_type(ServerGroupType::Srv)
        .host_name(host)
        .build()
        .unwrap()
    };
    assert!(matches!(
      resolve_elements(&resolver, &sg("nxdomain.example.com")).await,
      Err(DnsError::NotFound(_))
    ));
    assert!(matches!(
      resolve_elements(&resolver, &sg("dead.example.com")).await,
      Err(DnsError::Malformed { .. })
    ));
  }

  #[tokio::test]
  async fn test_resolve_uri() {
    let mut resolver = MockDnsResolver::new();
    resolver.add_srv("_sip._udp.redirect.example.com", vec![srv(1, 1, 5099, "r1.example.com.")]);

    let uri: SipUri = "sip:bob@192.0.2.9".parse().unwrap();
    let elements = resolve_uri(&resolver, &uri).await.unwrap();
    assert_eq!(elements[0].unique_key(), "192.0.2.9:5060:UDP");

    let uri: SipUri = "sip:bob@redirect.example.com".parse().unwrap();
    let elements = resolve_uri(&resolver, &uri).await.unwrap();
    assert_eq!(elements[0].unique_key(), "r1.example.com:5099:UDP");

    let uri: SipUri = "sip:bob@plain.example.com;transport=tls".parse().unwrap();
    let elements = resolve_uri(&resolver, &uri).await.unwrap();
    assert_eq!(elements[0].unique_key(), "plain.example.com:5061:TLS");
  }
}
