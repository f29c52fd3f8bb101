use super::toml::ConfigToml;
use async_trait::async_trait;
use hot_reload::{Reload, ReloaderError, ReloaderReceiver};
use sip_egress_lib::{Config, ServerGroupMap, ServerGroupSource};

#[derive(Clone)]
/// Reloads the configuration file on every watch tick
pub struct ConfigTomlReloader {
  pub config_path: String,
}

#[async_trait]
impl Reload<ConfigToml> for ConfigTomlReloader {
  type Source = String;
  async fn new(source: &Self::Source) -> Result<Self, ReloaderError<ConfigToml>> {
    Ok(Self {
      config_path: source.clone(),
    })
  }

  async fn reload(&self) -> Result<Option<ConfigToml>, ReloaderError<ConfigToml>> {
    let conf = ConfigToml::new(&self.config_path)
      .map_err(|_e| ReloaderError::<ConfigToml>::Reload("Failed to reload config toml"))?;
    Ok(Some(conf))
  }
}

/// Server groups of the latest successfully loaded configuration file
pub struct ConfigTomlSource {
  config_rx: ReloaderReceiver<ConfigToml>,
}

impl ConfigTomlSource {
  pub fn new(config_rx: ReloaderReceiver<ConfigToml>) -> Self {
    Self { config_rx }
  }
}

#[async_trait]
impl ServerGroupSource for ConfigTomlSource {
  async fn fetch(&self) -> anyhow::Result<ServerGroupMap> {
    let Some(config_toml) = self.config_rx.borrow().clone() else {
      anyhow::bail!("configuration is not loaded yet");
    };
    let config = Config::try_from(config_toml)?;
    Ok(config.server_groups)
  }
}
