//! Scripted collaborators shared by the engine and monitor tests

use crate::{
  error::TransportError,
  forward::ProxyForwarder,
  message::{Hop, SipRequest, SipResponse},
  metrics::MetricsSink,
};
use std::{
  collections::{HashMap, VecDeque},
  sync::{Arc, Mutex},
};

/// Route library logs to the captured test output, shown for failing tests
pub(crate) fn init_test_logger() {
  let _ = tracing_subscriber::fmt()
    .with_test_writer()
    .with_max_level(tracing::Level::DEBUG)
    .try_init();
}

#[derive(Clone, Default)]
/// In-memory sink of formatted log lines
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

impl LogCapture {
  /// Subscriber writing into this capture, to be installed with `tracing::subscriber::set_default`
  pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
    let writer = self.clone();
    tracing_subscriber::fmt()
      .with_ansi(false)
      .with_writer(move || writer.clone())
      .finish()
  }

  /// True if some line carries both the level and the text
  pub(crate) fn has_line(&self, level: &str, text: &str) -> bool {
    String::from_utf8_lossy(&self.0.lock().unwrap())
      .lines()
      .any(|l| l.contains(level) && l.contains(text))
  }
}

#[derive(Debug, Clone)]
/// What a scripted endpoint does with one request
pub(crate) enum Outcome {
  /// Answer with a bare response of this status code
  Respond(u16),
  /// Answer with a prepared response
  RespondWith(SipResponse),
  /// Fail at the transport level
  Fail(TransportError),
  /// Never answer
  Hang,
}

#[derive(Default)]
/// Forwarder replaying per-endpoint scripts. The last outcome of a script repeats forever.
pub(crate) struct ScriptedForwarder {
  scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
  calls: Mutex<Vec<(String, SipRequest)>>,
}

impl ScriptedForwarder {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Script the endpoint identified by `key` (`host:port:TRANSPORT`)
  pub(crate) fn script(self, key: &str, outcomes: Vec<Outcome>) -> Self {
    self.scripts.lock().unwrap().insert(key.to_string(), outcomes.into());
    self
  }

  /// Endpoint keys in the order they were contacted
  pub(crate) fn contacted(&self) -> Vec<String> {
    self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
  }

  /// Requests in the order they were forwarded
  pub(crate) fn requests(&self) -> Vec<SipRequest> {
    self.calls.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
  }

  pub(crate) fn count(&self, key: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|(k, _)| k == key).count()
  }

  fn next_outcome(&self, key: &str) -> Option<Outcome> {
    let mut scripts = self.scripts.lock().unwrap();
    let script = scripts.get_mut(key)?;
    if script.len() > 1 { script.pop_front() } else { script.front().cloned() }
  }
}

#[async_trait::async_trait]
impl ProxyForwarder for ScriptedForwarder {
  async fn forward(&self, hop: &Hop, request: SipRequest) -> Result<SipResponse, TransportError> {
    let key = hop.key();
    self.calls.lock().unwrap().push((key.clone(), request.clone()));
    match self.next_outcome(&key) {
      Some(Outcome::Respond(status)) => Ok(SipResponse::for_request(status, &request)),
      Some(Outcome::RespondWith(response)) => Ok(response),
      Some(Outcome::Fail(e)) => Err(e),
      Some(Outcome::Hang) => std::future::pending().await,
      None => Err(TransportError::Unresolvable(key)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetricEvent {
  pub group: String,
  /// None for group level events
  pub element: Option<String>,
  pub is_up: bool,
}

#[derive(Default)]
/// Metrics sink keeping every event
pub(crate) struct RecordingMetrics {
  events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
  pub(crate) fn events(&self) -> Vec<MetricEvent> {
    self.events.lock().unwrap().clone()
  }

  pub(crate) fn element_events(&self, key: &str) -> Vec<bool> {
    self
      .events()
      .into_iter()
      .filter(|e| e.element.as_deref() == Some(key))
      .map(|e| e.is_up)
      .collect()
  }

  pub(crate) fn group_events(&self, group: &str) -> Vec<bool> {
    self
      .events()
      .into_iter()
      .filter(|e| e.element.is_none() && e.group == group)
      .map(|e| e.is_up)
      .collect()
  }
}

impl MetricsSink for RecordingMetrics {
  fn send_group_metric(&self, group_name: &str, is_up: bool) {
    self.events.lock().unwrap().push(MetricEvent {
      group: group_name.to_string(),
      element: None,
      is_up,
    });
  }

  fn send_element_metric(&self, group_name: &str, element_key: &str, is_up: bool) {
    self.events.lock().unwrap().push(MetricEvent {
      group: group_name.to_string(),
      element: Some(element_key.to_string()),
      is_up,
    });
  }
}
