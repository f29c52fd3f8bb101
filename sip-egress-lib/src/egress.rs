//! Egress engine: routes one outbound request of a trunk through its server groups
//!
//! Candidates are contacted strictly one at a time. Failover responses and transport errors move on
//! to the next candidate, 3xx responses are expanded into their contacts when the trunk follows
//! redirects, and everything runs under the overall timeout of the trunk.

use crate::{
  constants::{MAX_REDIRECT_DEPTH, log_event_names},
  dns::{DnsResolver, resolve_elements, resolve_uri},
  error::{DnsError, EgressError, TransportError},
  forward::{NoopNormalizer, Normalizer},
  liveness::LivenessMonitor,
  load_balance::LoadBalancer,
  message::{Hop, SipRequest, SipResponse, SipUri},
  network::Networks,
  server_group::{FailoverPolicy, LbType, ServerGroupElement, ServerGroupMap},
  trace::*,
  trunk::TrunkConfig,
};
use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc, time::Duration};

/// One deliverable target
struct Candidate {
  hop: Hop,
  /// Request-URI replacing the original one, set for redirect contacts
  target_uri: Option<SipUri>,
}

impl Candidate {
  fn from_element(element: ServerGroupElement, network: &str, target_uri: Option<SipUri>) -> Self {
    Self {
      hop: Hop {
        host: element.host,
        port: element.port,
        transport: element.transport,
        network: network.to_string(),
      },
      target_uri,
    }
  }
}

#[derive(Default)]
/// What one egress call has collected so far
struct AttemptState {
  /// Failure response with the lowest status code, first one wins on ties
  best_response: Option<SipResponse>,
  last_error: Option<TransportError>,
  last_dns_error: Option<DnsError>,
  /// Endpoints whose 3xx is currently being expanded, innermost last
  redirect_stack: Vec<String>,
  attempts: usize,
}

impl AttemptState {
  fn record_response(&mut self, response: SipResponse) {
    match &self.best_response {
      Some(best) if best.status <= response.status => {}
      _ => self.best_response = Some(response),
    }
  }

  /// A transport error either competes as a synthetic response or is kept as the last error
  fn record_error(&mut self, error: TransportError, retry_response_code: Option<u16>, request: &SipRequest) {
    if let Some(status) = retry_response_code {
      self.record_response(SipResponse::for_request(status, request));
    }
    self.last_error = Some(error);
  }

  fn into_result(self, timed_out: Option<Duration>) -> Result<SipResponse, EgressError> {
    if let Some(response) = self.best_response {
      return Ok(response);
    }
    if let Some(e) = self.last_error {
      return Err(EgressError::Transport(e));
    }
    if let Some(timeout) = timed_out {
      return Err(EgressError::Timeout(timeout));
    }
    if let Some(e) = self.last_dns_error {
      return Err(EgressError::Dns(e));
    }
    Err(EgressError::NoCandidates)
  }
}

type CandidatesFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<SipResponse>, EgressError>> + Send + 'a>>;

#[derive(Clone, derive_builder::Builder)]
/// Egress engine of one trunk
pub struct EgressEngine {
  trunk: TrunkConfig,

  /// Every configured server group, the trunk picks its own by name
  server_groups: Arc<ServerGroupMap>,

  networks: Networks,

  dns_resolver: Arc<dyn DnsResolver>,

  #[builder(default)]
  load_balancer: LoadBalancer,

  #[builder(default = "Arc::new(NoopNormalizer) as Arc<dyn Normalizer>")]
  normalizer: Arc<dyn Normalizer>,

  #[builder(setter(strip_option), default)]
  /// Consulted only when the trunk policy skips down elements
  liveness: Option<LivenessMonitor>,
}

impl EgressEngine {
  pub fn trunk(&self) -> &TrunkConfig {
    &self.trunk
  }

  /// Route `request` and return the final response to relay upstream
  pub async fn process_egress(&self, request: SipRequest) -> Result<SipResponse, EgressError> {
    self.process_egress_with_affinity(request, None).await
  }

  /// Same as [EgressEngine::process_egress], with the key hashed by [LbType::Affinity] groups
  pub async fn process_egress_with_affinity(
    &self,
    request: SipRequest,
    affinity_key: Option<&str>,
  ) -> Result<SipResponse, EgressError> {
    let overall_timeout = self.trunk.policy.overall_timeout;
    let mut state = AttemptState::default();
    let outcome = tokio::time::timeout(overall_timeout, self.route(&request, affinity_key, &mut state)).await;
    let attempts = state.attempts;

    let result = match outcome {
      Ok(Ok(Some(response))) => Ok(response),
      Ok(Ok(None)) => state.into_result(None),
      Ok(Err(e)) => Err(e),
      Err(_) => {
        warn!("Egress of trunk {} timed out after {:?}", self.trunk.name, overall_timeout);
        state.into_result(Some(overall_timeout))
      }
    };

    match &result {
      Ok(response) => info!(
        name: log_event_names::EGRESS,
        trunk = self.trunk.name.as_str(),
        attempts,
        status = response.status,
        "Egress completed with {} {}",
        response.status,
        response.reason
      ),
      Err(e @ EgressError::Configuration(_)) => error!(
        name: log_event_names::EGRESS,
        trunk = self.trunk.name.as_str(),
        attempts,
        "Egress failed: {e}"
      ),
      Err(e) => warn!(
        name: log_event_names::EGRESS,
        trunk = self.trunk.name.as_str(),
        attempts,
        "Egress failed: {e}"
      ),
    }
    result
  }

  async fn route(
    &self,
    request: &SipRequest,
    affinity_key: Option<&str>,
    state: &mut AttemptState,
  ) -> Result<Option<SipResponse>, EgressError> {
    let groups = self
      .trunk
      .server_groups
      .iter()
      .map(|name| {
        self.server_groups.get(name).ok_or_else(|| {
          EgressError::configuration(format!("unknown server group {name} in trunk {}", self.trunk.name))
        })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let mut contacted = HashSet::new();
    for sg in self.load_balancer.order_groups(&groups) {
      let elements = match resolve_elements(self.dns_resolver.as_ref(), sg).await {
        Ok(elements) => elements,
        Err(e) => {
          warn!("Skipping server group {}: {e}", sg.name);
          state.last_dns_error = Some(e);
          continue;
        }
      };
      let key = match sg.lb_type {
        LbType::CallId => request.call_id(),
        LbType::Affinity => affinity_key,
        LbType::Weight | LbType::Once => None,
      };
      let candidates = self
        .load_balancer
        .order_elements(&elements, sg.lb_type, key)
        .into_iter()
        .map(|e| Candidate::from_element(e, &sg.network_name, None))
        .collect();

      if let Some(response) = self
        .try_candidates(request, candidates, &sg.failover_policy, state, &mut contacted, 0)
        .await?
      {
        return Ok(Some(response));
      }
      debug!("Server group {} exhausted", sg.name);
    }
    Ok(None)
  }

  /// Contact candidates in order until one gives a final answer.
  /// `contacted` is the set of endpoints already tried in the current scope.
  fn try_candidates<'a>(
    &'a self,
    request: &'a SipRequest,
    candidates: Vec<Candidate>,
    failover: &'a FailoverPolicy,
    state: &'a mut AttemptState,
    contacted: &'a mut HashSet<String>,
    depth: usize,
  ) -> CandidatesFuture<'a> {
    Box::pin(async move {
      for candidate in candidates {
        let key = candidate.hop.key();
        if !contacted.insert(key.clone()) {
          debug!("Skipping {key}, already contacted");
          continue;
        }
        if self.trunk.policy.skip_down_elements && self.liveness.as_ref().is_some_and(|m| m.is_known_down(&key)) {
          debug!("Skipping {key}, known to be down");
          continue;
        }
        let forwarder = self.networks.get(&candidate.hop.network).ok_or_else(|| {
          EgressError::configuration(format!("no provider for network {} of {key}", candidate.hop.network))
        })?;

        let mut outgoing = request.clone();
        outgoing.retarget(&candidate.hop, candidate.target_uri.as_ref());
        self.normalizer.egress_pre(&mut outgoing, &candidate.hop);
        state.attempts += 1;
        debug!("Attempt {} of trunk {}: {}", state.attempts, self.trunk.name, candidate.hop);

        let mut response = match forwarder.forward(&candidate.hop, outgoing).await {
          Ok(response) => response,
          Err(e) => {
            warn!("Forwarding to {} failed: {e}", candidate.hop);
            state.record_error(e, failover.retry_response_code, request);
            continue;
          }
        };
        self.normalizer.egress_post(&mut response, &candidate.hop);

        if response.is_redirect() {
          if !self.trunk.policy.follow_redirects {
            return Ok(Some(response));
          }
          if depth >= MAX_REDIRECT_DEPTH {
            warn!("Redirect from {key} not followed, nesting too deep: {:?}", state.redirect_stack);
            state.record_response(response);
            continue;
          }
          let redirect_candidates = self.expand_redirect(&response, &candidate.hop.network).await;
          if redirect_candidates.is_empty() {
            debug!("Redirect from {key} has no usable contact");
            state.record_response(response);
            continue;
          }

          state.redirect_stack.push(key);
          let mut redirect_contacted = HashSet::new();
          let outcome = self
            .try_candidates(
              request,
              redirect_candidates,
              failover,
              &mut *state,
              &mut redirect_contacted,
              depth + 1,
            )
            .await;
          state.redirect_stack.pop();
          if let Some(final_response) = outcome? {
            return Ok(Some(final_response));
          }
          // A followed 3xx is only kept when its contacts produced nothing better to relay
          if state.best_response.is_none() {
            state.record_response(response);
          }
          continue;
        }

        if failover.is_failover_code(response.status) {
          debug!("{} answered {}, failing over", candidate.hop, response.status);
          state.record_response(response);
          continue;
        }
        return Ok(Some(response));
      }
      Ok::<_, EgressError>(None)
    })
  }

  /// Candidates of the contacts of a 3xx, by descending q-value. Equal q-values keep the header order.
  async fn expand_redirect(&self, response: &SipResponse, network: &str) -> Vec<Candidate> {
    let mut contacts = response.contacts();
    contacts.sort_by(|a, b| b.q.total_cmp(&a.q));

    let mut candidates = Vec::new();
    for contact in contacts {
      match resolve_uri(self.dns_resolver.as_ref(), &contact.uri).await {
        Ok(elements) => candidates.extend(
          self
            .load_balancer
            .order_elements(&elements, LbType::Weight, None)
            .into_iter()
            .map(|e| Candidate::from_element(e, network, Some(contact.uri.clone()))),
        ),
        Err(e) => warn!("Skipping redirect contact {}: {e}", contact.uri),
      }
    }
    candidates
  }
}
