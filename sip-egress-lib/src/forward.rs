//! Collaborator contracts around delivery: forwarding and header normalization

use crate::{
  error::TransportError,
  message::{Hop, SipRequest, SipResponse},
};

/// Sends a request to one endpoint and yields its final response.
/// Implementations own the transaction machinery, including their own retransmission timers.
#[async_trait::async_trait]
pub trait ProxyForwarder: Send + Sync {
  async fn forward(&self, hop: &Hop, request: SipRequest) -> Result<SipResponse, TransportError>;
}

/// Header and parameter rewriting hooks called around every forward of an egress call
pub trait Normalizer: Send + Sync {
  /// Called on the per-candidate copy of the request right before it is forwarded
  fn egress_pre(&self, _request: &mut SipRequest, _hop: &Hop) {}

  /// Called on every response received from a candidate, before the failover decision
  fn egress_post(&self, _response: &mut SipResponse, _hop: &Hop) {}
}

#[derive(Debug, Clone, Copy, Default)]
/// Normalizer leaving messages untouched
pub struct NoopNormalizer;

impl Normalizer for NoopNormalizer {}
