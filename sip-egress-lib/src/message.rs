//! Already-parsed SIP messages exchanged with the transport collaborator
//!
//! Only the parts the routing core reads or rewrites are modeled: request-URI,
//! headers (Call-ID, CSeq, Max-Forwards, Contact) and an opaque body.

use crate::error::ParseError;
use bytes::Bytes;
use rand::Rng;
use std::{fmt, net::IpAddr, str::FromStr};

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
/// SIP transport protocol
pub enum Transport {
  #[default]
  Udp,
  Tcp,
  Tls,
}

impl Transport {
  /// Default port when neither the URI nor DNS gives one
  pub fn default_port(&self) -> u16 {
    match self {
      Self::Udp | Self::Tcp => 5060,
      Self::Tls => 5061,
    }
  }

  /// Lowercase token used in the `transport=` URI parameter
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Udp => "udp",
      Self::Tcp => "tcp",
      Self::Tls => "tls",
    }
  }

  /// Service and protocol labels of the SRV owner name, e.g., `_sip._udp`
  pub(crate) fn srv_prefix(&self) -> &'static str {
    match self {
      Self::Udp => "_sip._udp",
      Self::Tcp => "_sip._tcp",
      Self::Tls => "_sips._tcp",
    }
  }
}

impl fmt::Display for Transport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Udp => write!(f, "UDP"),
      Self::Tcp => write!(f, "TCP"),
      Self::Tls => write!(f, "TLS"),
    }
  }
}

impl TryFrom<&str> for Transport {
  type Error = ParseError;
  fn try_from(value: &str) -> Result<Self, Self::Error> {
    match value.to_ascii_lowercase().as_str() {
      "udp" => Ok(Self::Udp),
      "tcp" => Ok(Self::Tcp),
      "tls" => Ok(Self::Tls),
      _ => Err(ParseError::InvalidTransport(value.to_string())),
    }
  }
}

/// Unique key of a physical endpoint, `host:port:TRANSPORT`
pub fn endpoint_key(host: &str, port: u16, transport: Transport) -> String {
  format!("{host}:{port}:{transport}")
}

/// Random token usable as Call-ID, tag or branch suffix
pub fn random_token() -> String {
  format!("{:016x}", rand::rng().random::<u64>())
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq)]
/// `sip:` or `sips:` URI
pub struct SipUri {
  /// `sips:` scheme
  pub secure: bool,
  /// User part, including an optional password
  pub user: Option<String>,
  /// Host name or IP address, without brackets for IPv6
  pub host: String,
  pub port: Option<u16>,
  /// URI parameters in their original order, names are lowercased
  pub params: Vec<(String, Option<String>)>,
}

impl SipUri {
  /// Create a `sip:` URI with only a host part
  pub fn new(host: impl Into<String>) -> Self {
    Self {
      secure: false,
      user: None,
      host: host.into(),
      port: None,
      params: Vec::new(),
    }
  }

  /// Value of a URI parameter, `Some("")` for a parameter without value
  pub fn param(&self, name: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_deref().unwrap_or(""))
  }

  /// Set or replace a URI parameter
  pub fn set_param(&mut self, name: &str, value: Option<String>) {
    let name = name.to_ascii_lowercase();
    match self.params.iter_mut().find(|(k, _)| *k == name) {
      Some(entry) => entry.1 = value,
      None => self.params.push((name, value)),
    }
  }

  /// Remove a URI parameter if present
  pub fn remove_param(&mut self, name: &str) {
    self.params.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
  }

  /// Transport requested by the URI, falling back to TLS for `sips:` and UDP otherwise
  pub fn transport(&self) -> Transport {
    self
      .param("transport")
      .and_then(|t| Transport::try_from(t).ok())
      .unwrap_or(if self.secure { Transport::Tls } else { Transport::Udp })
  }

  /// True if the host part is a literal IP address
  pub fn is_numeric_host(&self) -> bool {
    self.host.parse::<IpAddr>().is_ok()
  }
}

impl fmt::Display for SipUri {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:", if self.secure { "sips" } else { "sip" })?;
    if let Some(user) = &self.user {
      write!(f, "{user}@")?;
    }
    if self.host.contains(':') {
      write!(f, "[{}]", self.host)?;
    } else {
      write!(f, "{}", self.host)?;
    }
    if let Some(port) = self.port {
      write!(f, ":{port}")?;
    }
    for (k, v) in &self.params {
      match v {
        Some(v) => write!(f, ";{k}={v}")?,
        None => write!(f, ";{k}")?,
      }
    }
    Ok(())
  }
}

impl FromStr for SipUri {
  type Err = ParseError;

  /// Parses `sip:[user@]host[:port][;params][?headers]`, URI headers are dropped
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let invalid = || ParseError::InvalidUri(s.to_string());
    let (secure, rest) = if let Some(rest) = strip_prefix_ignore_case(s, "sips:") {
      (true, rest)
    } else if let Some(rest) = strip_prefix_ignore_case(s, "sip:") {
      (false, rest)
    } else {
      return Err(invalid());
    };
    let rest = rest.split_once('?').map(|(r, _)| r).unwrap_or(rest);
    let (user_host, params_str) = match rest.split_once(';') {
      Some((uh, p)) => (uh, Some(p)),
      None => (rest, None),
    };
    let (user, host_port) = match user_host.rsplit_once('@') {
      Some((u, hp)) if !u.is_empty() => (Some(u.to_string()), hp),
      Some(_) => return Err(invalid()),
      None => (None, user_host),
    };

    let (host, port) = if let Some(v6) = host_port.strip_prefix('[') {
      let (host, after) = v6.split_once(']').ok_or_else(invalid)?;
      let port = match after.strip_prefix(':') {
        Some(p) => Some(p.parse::<u16>().map_err(|_| invalid())?),
        None if after.is_empty() => None,
        None => return Err(invalid()),
      };
      (host.to_string(), port)
    } else {
      match host_port.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), Some(p.parse::<u16>().map_err(|_| invalid())?)),
        None => (host_port.to_string(), None),
      }
    };
    if host.is_empty() {
      return Err(invalid());
    }

    let params = params_str
      .map(|p| {
        p.split(';')
          .filter(|kv| !kv.is_empty())
          .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), Some(v.trim().to_string())),
            None => (kv.trim().to_ascii_lowercase(), None),
          })
          .collect()
      })
      .unwrap_or_default();

    Ok(Self {
      secure,
      user,
      host,
      port,
      params,
    })
  }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
  s.get(..prefix.len())
    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    .then(|| &s[prefix.len()..])
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq)]
/// One entry of a Contact header
pub struct Contact {
  pub uri: SipUri,
  /// Preference between 0.0 and 1.0, 1.0 when absent
  pub q: f32,
}

impl FromStr for Contact {
  type Err = ParseError;

  /// Parses `["display"] <uri>;q=0.5` and `uri;q=0.5` forms
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let invalid = || ParseError::InvalidContact(s.to_string());
    if s == "*" {
      return Err(invalid());
    }
    let (uri_str, params_str) = match (s.find('<'), s.rfind('>')) {
      (Some(open), Some(close)) if open < close => (&s[open + 1..close], &s[close + 1..]),
      (None, None) => match s.split_once(';') {
        Some((u, p)) => (u, p),
        None => (s, ""),
      },
      _ => return Err(invalid()),
    };
    let uri = uri_str.parse::<SipUri>().map_err(|_| invalid())?;

    let mut q = 1.0f32;
    for param in params_str.split(';').map(str::trim).filter(|p| !p.is_empty()) {
      if let Some((k, v)) = param.split_once('=') {
        if k.trim().eq_ignore_ascii_case("q") {
          q = v.trim().parse::<f32>().map_err(|_| invalid())?.clamp(0.0, 1.0);
        }
      }
    }
    Ok(Self { uri, q })
  }
}

/// Split a comma separated header value, ignoring commas inside quotes and angle brackets
pub(crate) fn split_header_list(value: &str) -> Vec<&str> {
  let mut items = Vec::new();
  let (mut in_quotes, mut in_angle, mut start) = (false, false, 0);
  for (i, c) in value.char_indices() {
    match c {
      '"' => in_quotes = !in_quotes,
      '<' if !in_quotes => in_angle = true,
      '>' if !in_quotes => in_angle = false,
      ',' if !in_quotes && !in_angle => {
        items.push(value[start..i].trim());
        start = i + 1;
      }
      _ => {}
    }
  }
  items.push(value[start..].trim());
  items.into_iter().filter(|s| !s.is_empty()).collect()
}

/* ---------------------------------------------------------- */
/// Compact header forms defined in RFC 3261 section 7.3.3
fn canonical_header_name(name: &str) -> &str {
  match name {
    "i" | "I" => "Call-ID",
    "m" | "M" => "Contact",
    "v" | "V" => "Via",
    "l" | "L" => "Content-Length",
    "f" | "F" => "From",
    "t" | "T" => "To",
    "c" | "C" => "Content-Type",
    other => other,
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Ordered header list with case-insensitive lookup
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// First value of the header
  pub fn get(&self, name: &str) -> Option<&str> {
    self.get_all(name).next()
  }

  /// All values of the header in order
  pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
    let name = canonical_header_name(name).to_string();
    self
      .0
      .iter()
      .filter(move |(k, _)| canonical_header_name(k).eq_ignore_ascii_case(&name))
      .map(|(_, v)| v.as_str())
  }

  /// Append a header value
  pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.push((name.into(), value.into()));
  }

  /// Replace every value of the header by a single one
  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    self.remove(&name);
    self.0.push((name, value.into()));
  }

  /// Remove every value of the header
  pub fn remove(&mut self, name: &str) {
    let name = canonical_header_name(name).to_string();
    self
      .0
      .retain(|(k, _)| !canonical_header_name(k).eq_ignore_ascii_case(&name));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq)]
/// SIP request
pub struct SipRequest {
  pub method: String,
  pub uri: SipUri,
  pub headers: Headers,
  pub body: Bytes,
}

impl SipRequest {
  pub fn new(method: impl Into<String>, uri: SipUri) -> Self {
    Self {
      method: method.into(),
      uri,
      headers: Headers::new(),
      body: Bytes::new(),
    }
  }

  /// Out-of-dialog OPTIONS request addressed to `uri`, with fresh Call-ID and tag
  pub fn options(uri: SipUri, max_forwards: u8) -> Self {
    let mut req = Self::new("OPTIONS", uri.clone());
    req.headers.push("From", format!("<sip:ping@{}>;tag={}", uri.host, random_token()));
    req.headers.push("To", format!("<{uri}>"));
    req.headers.push("Call-ID", random_token());
    req.headers.push("CSeq", "1 OPTIONS");
    req.headers.push("Max-Forwards", max_forwards.to_string());
    req
  }

  pub fn call_id(&self) -> Option<&str> {
    self.headers.get("Call-ID")
  }

  pub fn cseq(&self) -> Option<&str> {
    self.headers.get("CSeq")
  }

  pub fn max_forwards(&self) -> Option<u8> {
    self.headers.get("Max-Forwards").and_then(|v| v.trim().parse().ok())
  }

  /// Point the request at a candidate.
  /// With a redirect target the request-URI is replaced by the contact URI,
  /// otherwise host, port and transport of the current request-URI are rewritten to the hop.
  pub(crate) fn retarget(&mut self, hop: &Hop, target_uri: Option<&SipUri>) {
    if let Some(uri) = target_uri {
      self.uri = uri.clone();
      return;
    }
    self.uri.host = hop.host.clone();
    self.uri.port = Some(hop.port);
    match hop.transport {
      Transport::Udp => self.uri.remove_param("transport"),
      other => self.uri.set_param("transport", Some(other.as_str().to_string())),
    }
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq)]
/// SIP response
pub struct SipResponse {
  pub status: u16,
  pub reason: String,
  pub headers: Headers,
  pub body: Bytes,
}

impl SipResponse {
  /// Response with the default reason phrase of the status code
  pub fn new(status: u16) -> Self {
    Self {
      status,
      reason: reason_phrase(status).to_string(),
      headers: Headers::new(),
      body: Bytes::new(),
    }
  }

  /// Locally generated response to `request`, copying the transaction identifying headers
  pub fn for_request(status: u16, request: &SipRequest) -> Self {
    let mut res = Self::new(status);
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
      for value in request.headers.get_all(name) {
        res.headers.push(name, value);
      }
    }
    res
  }

  pub fn is_provisional(&self) -> bool {
    self.status < 200
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_redirect(&self) -> bool {
    (300..400).contains(&self.status)
  }

  pub fn call_id(&self) -> Option<&str> {
    self.headers.get("Call-ID")
  }

  pub fn cseq(&self) -> Option<&str> {
    self.headers.get("CSeq")
  }

  /// Contacts of all Contact headers, in header order. Unparsable entries are skipped.
  pub fn contacts(&self) -> Vec<Contact> {
    self
      .headers
      .get_all("Contact")
      .flat_map(split_header_list)
      .filter_map(|c| c.parse::<Contact>().ok())
      .collect()
  }
}

/// Default reason phrase for a status code
pub fn reason_phrase(status: u16) -> &'static str {
  match status {
    100 => "Trying",
    180 => "Ringing",
    183 => "Session Progress",
    200 => "OK",
    300 => "Multiple Choices",
    301 => "Moved Permanently",
    302 => "Moved Temporarily",
    305 => "Use Proxy",
    380 => "Alternative Service",
    400 => "Bad Request",
    403 => "Forbidden",
    404 => "Not Found",
    408 => "Request Timeout",
    480 => "Temporarily Unavailable",
    482 => "Loop Detected",
    483 => "Too Many Hops",
    486 => "Busy Here",
    487 => "Request Terminated",
    500 => "Server Internal Error",
    502 => "Bad Gateway",
    503 => "Service Unavailable",
    504 => "Server Time-out",
    600 => "Busy Everywhere",
    603 => "Decline",
    _ => match status / 100 {
      1 => "Provisional",
      2 => "Success",
      3 => "Redirection",
      4 => "Client Error",
      5 => "Server Error",
      _ => "Global Failure",
    },
  }
}

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Resolved target of one delivery attempt
pub struct Hop {
  pub host: String,
  pub port: u16,
  pub transport: Transport,
  /// Name of the network the request is sent over
  pub network: String,
}

impl Hop {
  /// Unique endpoint key, shared with [crate::ServerGroupElement::unique_key]
  pub fn key(&self) -> String {
    endpoint_key(&self.host, self.port, self.transport)
  }
}

impl fmt::Display for Hop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} via {}", self.key(), self.network)
  }
}
