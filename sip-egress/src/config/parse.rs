use anyhow::anyhow;
use clap::{Arg, ArgGroup};

/// Parsed options
pub struct Opts {
  /// Configuration file path
  pub config_file_path: String,
  /// One-shot routing of an OPTIONS request instead of running the monitor
  pub route: Option<RouteOpts>,
}

/// Target of a one-shot OPTIONS request
pub struct RouteOpts {
  pub trunk: String,
  pub uri: String,
}

/// Parse arg values passed from cli
pub fn parse_opts() -> Result<Opts, anyhow::Error> {
  let _ = include_str!("../../Cargo.toml");
  let options = clap::command!()
    .arg(
      Arg::new("config_file")
        .long("config")
        .short('c')
        .value_name("FILE")
        .required(true)
        .help("Configuration file path like ./config.toml"),
    )
    .arg(
      Arg::new("route")
        .long("route")
        .short('r')
        .value_name("TRUNK")
        .requires("uri")
        .help("Send one OPTIONS request through the given trunk and exit"),
    )
    .arg(
      Arg::new("uri")
        .long("uri")
        .short('u')
        .value_name("SIP_URI")
        .requires("route")
        .help("Request-URI of the OPTIONS request sent with --route, like sip:+15550100@example.com"),
    )
    .group(ArgGroup::new("one_shot").args(["route", "uri"]).multiple(true));
  let matches = options.get_matches();

  ///////////////////////////////////
  let config_file_path = matches
    .get_one::<String>("config_file")
    .ok_or_else(|| anyhow!("config_file is required"))?
    .to_owned();
  let route = match (matches.get_one::<String>("route"), matches.get_one::<String>("uri")) {
    (Some(trunk), Some(uri)) => Some(RouteOpts {
      trunk: trunk.to_owned(),
      uri: uri.to_owned(),
    }),
    _ => None,
  };

  Ok(Opts {
    config_file_path,
    route,
  })
}
