use super::codec::{ack_for, decode_response, encode_request, push_via, top_via_branch};
use crate::{
  constants::{SIP_TIMER_T1_MSEC, SIP_TIMER_T2_MSEC, UDP_RECV_BUFFER_SIZE},
  log::*,
  socket::bind_udp_socket,
};
use sip_egress_lib::{Hop, NetworkConfig, ProxyForwarder, SipRequest, SipResponse, Transport, TransportError};
use std::{
  net::{IpAddr, SocketAddr},
  time::Duration,
};
use tokio::net::UdpSocket;

/// Stateless UDP forwarding provider of one network.
/// Every request runs in its own client transaction on a fresh ephemeral socket.
pub(crate) struct UdpForwarder {
  network: String,
  bind_ip: IpAddr,
  transaction_timeout: Duration,
}

impl UdpForwarder {
  pub(crate) fn new(config: &NetworkConfig) -> Self {
    Self {
      network: config.name.clone(),
      bind_ip: config.bind_ip,
      transaction_timeout: config.transaction_timeout,
    }
  }

  /// First address of the hop in the address family of the bind address
  async fn resolve(&self, hop: &Hop) -> Result<SocketAddr, TransportError> {
    let mut addrs = tokio::net::lookup_host((hop.host.as_str(), hop.port))
      .await
      .map_err(|e| TransportError::Unresolvable(format!("{}: {e}", hop.host)))?;
    addrs
      .find(|a| a.is_ipv4() == self.bind_ip.is_ipv4())
      .ok_or_else(|| TransportError::Unresolvable(format!("{} has no address usable from {}", hop.host, self.bind_ip)))
  }
}

#[async_trait::async_trait]
impl ProxyForwarder for UdpForwarder {
  async fn forward(&self, hop: &Hop, mut request: SipRequest) -> Result<SipResponse, TransportError> {
    if hop.network != self.network {
      return Err(TransportError::NoProviderForNetwork(hop.network.clone()));
    }
    if hop.transport != Transport::Udp {
      return Err(TransportError::UnsupportedTransport(hop.transport.to_string()));
    }
    let destination = self.resolve(hop).await?;
    let socket = bind_udp_socket(self.bind_ip)?;
    let branch = push_via(&mut request, socket.local_addr()?);
    debug!("{} {} -> {destination} (branch {branch})", request.method, request.uri);

    let transaction = ClientTransaction {
      socket: &socket,
      destination,
      request: &request,
      branch: &branch,
    };
    tokio::time::timeout(self.transaction_timeout, transaction.run())
      .await
      .map_err(|_| TransportError::Timeout)?
  }
}

/// One UDP client transaction, following the retransmission rules of RFC 3261 section 17.1
struct ClientTransaction<'a> {
  socket: &'a UdpSocket,
  destination: SocketAddr,
  request: &'a SipRequest,
  branch: &'a str,
}

impl ClientTransaction<'_> {
  async fn run(&self) -> Result<SipResponse, TransportError> {
    let is_invite = self.request.method.eq_ignore_ascii_case("INVITE");
    let datagram = encode_request(self.request);
    let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
    let mut retransmit = Some(Duration::from_millis(SIP_TIMER_T1_MSEC));

    self.socket.send_to(&datagram, self.destination).await?;
    loop {
      let received = match retransmit {
        Some(interval) => tokio::select! {
          res = self.socket.recv_from(&mut buf) => Some(res?),
          _ = tokio::time::sleep(interval) => None,
        },
        None => Some(self.socket.recv_from(&mut buf).await?),
      };
      let Some((len, from)) = received else {
        self.socket.send_to(&datagram, self.destination).await?;
        retransmit = retransmit.map(|i| next_interval(i, is_invite));
        continue;
      };

      let response = match decode_response(&buf[..len]) {
        Ok(response) => response,
        Err(e) => {
          debug!("Dropping datagram from {from}: {e}");
          continue;
        }
      };
      if top_via_branch(&response.headers) != Some(self.branch)
        || response.call_id() != self.request.call_id()
        || response.cseq() != self.request.cseq()
      {
        debug!("Dropping response from {from} not matching the transaction");
        continue;
      }

      if response.is_provisional() {
        // provisional responses stop INVITE retransmissions and slow down the others
        retransmit = if is_invite {
          None
        } else {
          Some(Duration::from_millis(SIP_TIMER_T2_MSEC))
        };
        continue;
      }
      if is_invite && !response.is_success() {
        let ack = ack_for(self.request, &response);
        if let Err(e) = self.socket.send_to(&encode_request(&ack), self.destination).await {
          warn!("Failed to send ACK to {}: {e}", self.destination);
        }
      }
      return Ok(response);
    }
  }
}

/// Timer A doubles without bound for INVITE, Timer E is capped at T2 otherwise
fn next_interval(current: Duration, is_invite: bool) -> Duration {
  let doubled = current * 2;
  if is_invite {
    doubled
  } else {
    doubled.min(Duration::from_millis(SIP_TIMER_T2_MSEC))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  fn forwarder(timeout: Duration) -> UdpForwarder {
    UdpForwarder {
      network: "net".to_string(),
      bind_ip: "127.0.0.1".parse().unwrap(),
      transaction_timeout: timeout,
    }
  }

  fn hop(port: u16) -> Hop {
    Hop {
      host: "127.0.0.1".to_string(),
      port,
      transport: Transport::Udp,
      network: "net".to_string(),
    }
  }

  /// UAS answering every request with `statuses` in sequence, ignoring the first `drop_first` requests
  async fn spawn_uas(statuses: Vec<u16>, drop_first: usize) -> (u16, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    tokio::spawn(async move {
      let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
      loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
          return;
        };
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < drop_first {
          continue;
        }
        let text = String::from_utf8_lossy(&buf[..len]).to_string();
        if text.starts_with("ACK ") {
          continue;
        }
        let headers: Vec<&str> = text
          .split("\r\n")
          .filter(|l| ["Via:", "From:", "To:", "Call-ID:", "CSeq:"].iter().any(|h| l.starts_with(h)))
          .collect();
        for status in &statuses {
          let response = format!(
            "SIP/2.0 {status} {}\r\n{}\r\nContent-Length: 0\r\n\r\n",
            sip_egress_lib::reason_phrase(*status),
            headers.join("\r\n")
          );
          let _ = socket.send_to(response.as_bytes(), from).await;
        }
      }
    });
    (port, received)
  }

  #[tokio::test]
  async fn test_forward_skips_provisional() {
    let (port, _) = spawn_uas(vec![100, 200], 0).await;
    let request = SipRequest::options("sip:127.0.0.1".parse().unwrap(), 70);
    let response = forwarder(Duration::from_secs(2)).forward(&hop(port), request.clone()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.call_id(), request.call_id());
  }

  #[tokio::test]
  async fn test_forward_retransmits_lost_request() {
    let (port, received) = spawn_uas(vec![200], 1).await;
    let request = SipRequest::options("sip:127.0.0.1".parse().unwrap(), 70);
    let response = forwarder(Duration::from_secs(3)).forward(&hop(port), request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(received.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_forward_times_out() {
    let (port, _) = spawn_uas(vec![200], usize::MAX).await;
    let request = SipRequest::options("sip:127.0.0.1".parse().unwrap(), 70);
    let res = forwarder(Duration::from_millis(300)).forward(&hop(port), request).await;
    assert!(matches!(res, Err(TransportError::Timeout)));
  }

  #[tokio::test]
  async fn test_forward_rejects_foreign_hops() {
    let request = SipRequest::options("sip:127.0.0.1".parse().unwrap(), 70);
    let mut tcp_hop = hop(5060);
    tcp_hop.transport = Transport::Tcp;
    assert!(matches!(
      forwarder(Duration::from_secs(1)).forward(&tcp_hop, request.clone()).await,
      Err(TransportError::UnsupportedTransport(_))
    ));
    let mut other_hop = hop(5060);
    other_hop.network = "other".to_string();
    assert!(matches!(
      forwarder(Duration::from_secs(1)).forward(&other_hop, request).await,
      Err(TransportError::NoProviderForNetwork(_))
    ));
  }

  #[test]
  fn test_retransmission_intervals() {
    let t1 = Duration::from_millis(SIP_TIMER_T1_MSEC);
    assert_eq!(next_interval(t1, true), Duration::from_secs(1));
    assert_eq!(next_interval(Duration::from_secs(4), true), Duration::from_secs(8));
    assert_eq!(next_interval(Duration::from_secs(4), false), Duration::from_secs(4));
  }
}
