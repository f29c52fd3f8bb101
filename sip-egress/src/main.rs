mod config;
mod constants;
mod log;
mod socket;
mod transport;

use crate::{
  config::{ConfigToml, ConfigTomlReloader, ConfigTomlSource, RouteOpts, parse_opts},
  constants::CONFIG_WATCH_DELAY_SECS,
  log::*,
  transport::build_networks,
};
use anyhow::anyhow;
use hot_reload::ReloaderService;
use sip_egress_lib::*;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
  init_logger();

  let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
  runtime_builder.enable_all();
  runtime_builder.thread_name("sip-egress");
  let runtime = match runtime_builder.build() {
    Ok(runtime) => runtime,
    Err(e) => {
      error!("Failed to build tokio runtime: {e}");
      std::process::exit(1);
    }
  };

  runtime.block_on(async {
    if let Err(e) = run(runtime.handle().clone()).await {
      error!("sip-egress exited: {e}");
      std::process::exit(1);
    }
  });
}

async fn run(runtime_handle: Handle) -> anyhow::Result<()> {
  let opts = parse_opts()?;
  let (config_service, config_rx) =
    ReloaderService::<ConfigTomlReloader, ConfigToml>::new(&opts.config_file_path, CONFIG_WATCH_DELAY_SECS, false)
      .await
      .map_err(|e| anyhow!("Failed to start config reloader: {e:?}"))?;

  let config_toml = config_rx
    .borrow()
    .clone()
    .ok_or_else(|| anyhow!("Something wrong in config reloader receiver"))?;
  let config = Config::try_from(config_toml)?;
  let networks = build_networks(&config);
  let dns_resolver: Arc<dyn DnsResolver> = Arc::new(HickoryDnsResolver::try_new()?);

  if let Some(route) = opts.route {
    return route_once(&config, networks, dns_resolver, &route).await;
  }

  // Networks are bound at startup, only server groups follow the configuration file
  let monitor = LivenessMonitor::new(
    networks,
    dns_resolver,
    Arc::new(TracingMetricsSink),
    Some(config.probe_timeout),
    runtime_handle,
  );
  let source = ConfigTomlSource::new(config_rx);
  let cancel_token = CancellationToken::new();
  info!(
    "Starting sip-egress with {} networks, {} server groups and {} trunks",
    config.networks.len(),
    config.server_groups.len(),
    config.trunks.len()
  );

  tokio::select! {
    config_res = config_service.start() => {
      if let Err(e) = config_res {
        error!("Config reloader service exited: {e:?}");
      }
    }
    _ = monitor.run_refresh_loop(&source, config.refresh_interval, cancel_token.child_token()) => {
      warn!("Liveness monitoring stopped");
    }
  }
  cancel_token.cancel();
  monitor.stop().await;
  Ok(())
}

/// Route one OPTIONS request through a trunk and report the final response
async fn route_once(
  config: &Config,
  networks: Networks,
  dns_resolver: Arc<dyn DnsResolver>,
  route: &RouteOpts,
) -> anyhow::Result<()> {
  let trunk = config
    .trunks
    .get(&route.trunk)
    .ok_or_else(|| anyhow!("Unknown trunk: {}", route.trunk))?;
  let uri: SipUri = route.uri.parse()?;
  let engine = EgressEngineBuilder::default()
    .trunk(trunk.clone())
    .server_groups(Arc::new(config.server_groups.clone()))
    .networks(networks)
    .dns_resolver(dns_resolver)
    .build()?;

  let response = engine
    .process_egress(SipRequest::options(uri, DEFAULT_MAX_FORWARDS))
    .await?;
  info!("Trunk {} answered {} {}", route.trunk, response.status, response.reason);
  Ok(())
}
