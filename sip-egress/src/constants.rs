/// Delay between two checks of the configuration file in seconds
pub const CONFIG_WATCH_DELAY_SECS: u32 = 15;

/// RFC 3261 T1, initial retransmission interval of UDP client transactions in milliseconds
pub const SIP_TIMER_T1_MSEC: u64 = 500;

/// RFC 3261 T2, maximum retransmission interval of UDP client transactions in milliseconds
pub const SIP_TIMER_T2_MSEC: u64 = 4_000;

/// Receive buffer of a client transaction socket, large enough for any unfragmented datagram
pub const UDP_RECV_BUFFER_SIZE: usize = 65_535;

/// Default timeout of one client transaction on a network
pub const DEFAULT_TRANSACTION_TIMEOUT: &str = "32s";

/// Default local address of a network
pub const DEFAULT_BIND_IP: &str = "0.0.0.0";
