use super::LivenessMonitor;
use crate::{
  constants::{CONFIG_REFRESH_BACKOFF_BASE_MSEC, CONFIG_REFRESH_BACKOFF_MAX_MSEC, CONFIG_REFRESH_MAX_RETRIES},
  server_group::{ServerGroupMap, is_server_group_map_updated},
  trace::*,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where the current server group configuration comes from
#[async_trait::async_trait]
pub trait ServerGroupSource: Send + Sync {
  async fn fetch(&self) -> anyhow::Result<ServerGroupMap>;
}

impl LivenessMonitor {
  /// Poll `source` every `interval` and restart monitoring whenever the map changes.
  /// Monitoring is stopped when `cancel_token` is cancelled.
  pub async fn run_refresh_loop(
    &self,
    source: &dyn ServerGroupSource,
    interval: Duration,
    cancel_token: CancellationToken,
  ) {
    loop {
      if let Some(server_groups) = fetch_with_backoff(source, &cancel_token).await {
        let updated = {
          let generation = self.inner.generation.lock().await;
          generation
            .as_ref()
            .is_none_or(|g| is_server_group_map_updated(&g.server_groups, &server_groups))
        };
        if updated {
          info!("Server group configuration changed, restarting liveness monitoring");
          self.start_monitoring(server_groups).await;
        } else {
          debug!("Server group configuration unchanged");
        }
      }

      tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = cancel_token.cancelled() => break,
      }
    }
    self.stop().await;
  }
}

/// Fetch with exponential back-off. Gives up after a bounded number of retries, or on cancellation.
async fn fetch_with_backoff(source: &dyn ServerGroupSource, cancel_token: &CancellationToken) -> Option<ServerGroupMap> {
  let mut backoff = Duration::from_millis(CONFIG_REFRESH_BACKOFF_BASE_MSEC);
  for attempt in 0..=CONFIG_REFRESH_MAX_RETRIES {
    match source.fetch().await {
      Ok(server_groups) => return Some(server_groups),
      Err(e) => warn!("Failed to fetch server group configuration (attempt {}): {e}", attempt + 1),
    }
    if attempt == CONFIG_REFRESH_MAX_RETRIES {
      break;
    }
    tokio::select! {
      _ = tokio::time::sleep(backoff) => {}
      _ = cancel_token.cancelled() => return None,
    }
    backoff = (backoff * 2).min(Duration::from_millis(CONFIG_REFRESH_BACKOFF_MAX_MSEC));
  }
  error!("Server group configuration unavailable, keeping the current monitoring until the next refresh");
  None
}
