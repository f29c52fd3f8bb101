mod parse;
mod service;
mod toml;

pub(crate) use self::{
  parse::{RouteOpts, parse_opts},
  service::{ConfigTomlReloader, ConfigTomlSource},
  toml::ConfigToml,
};
