/// Default interval between OPTIONS probes for an element that is up, in milliseconds
pub const DEFAULT_UP_INTERVAL_MSEC: u64 = 30_000;

/// Default interval between OPTIONS probes for an element that is down, in milliseconds
/// Shorter than the up interval so that a recovered element is noticed quickly.
pub const DEFAULT_DOWN_INTERVAL_MSEC: u64 = 5_000;

/// Default Max-Forwards value carried by OPTIONS probes
pub const DEFAULT_MAX_FORWARDS: u8 = 70;

/// Implicit timeout for a single OPTIONS probe in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MSEC: u64 = 5_000;

/// Default overall response timeout of one egress call in milliseconds (64*T1, i.e., Timer B/F)
pub const DEFAULT_OVERALL_TIMEOUT_MSEC: u64 = 32_000;

/// Maximum nesting of redirect (3xx) expansions within a single egress call.
/// A 3xx received beyond this depth is kept as a failure response instead of being followed.
pub const MAX_REDIRECT_DEPTH: usize = 5;

/// Default element priority when neither configuration nor DNS gives one
pub const DEFAULT_ELEMENT_PRIORITY: u32 = 10;

/// Default element weight when neither configuration nor DNS gives one
pub const DEFAULT_ELEMENT_WEIGHT: u32 = 100;

/// Default failover response codes of a server group
pub const DEFAULT_FAILOVER_RESPONSE_CODES: &[u16] = &[500, 502, 503, 504];

/// Default liveness failure response codes of a server group
pub const DEFAULT_LIVENESS_FAILURE_RESPONSE_CODES: &[u16] = &[503];

/// Interval between two fetches of the server group configuration in seconds
pub const CONFIG_REFRESH_INTERVAL_SEC: u64 = 30;

/// Initial back-off when the configuration source is unavailable, doubled on every retry
pub const CONFIG_REFRESH_BACKOFF_BASE_MSEC: u64 = 1_000;

/// Upper bound of a single back-off sleep in milliseconds
pub const CONFIG_REFRESH_BACKOFF_MAX_MSEC: u64 = 30_000;

/// Maximum number of retries of a failed configuration fetch before giving up until the next refresh tick
pub const CONFIG_REFRESH_MAX_RETRIES: u32 = 8;

/// Event names attached to structured log lines
pub mod log_event_names {
  /// Liveness transition of an element or a server group
  pub const LIVENESS: &str = "liveness";
  /// Final outcome of one egress call
  pub const EGRESS: &str = "egress";
}
