use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;

/// Bind a non-blocking UDP socket on an ephemeral port of `bind_ip` for one client transaction.
/// `SO_REUSEADDR` lets a restarted process rebind addresses of transactions that were still in flight.
pub(crate) fn bind_udp_socket(bind_ip: IpAddr) -> Result<UdpSocket, std::io::Error> {
  let local = SocketAddr::new(bind_ip, 0);
  let socket = if local.is_ipv6() {
    Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
  } else {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
  }?;
  socket.set_reuse_address(true)?;
  socket.set_nonblocking(true)?; // required by tokio

  socket.bind(&local.into())?;
  UdpSocket::from_std(socket.into())
}
