use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;
use pingora::server::Server;

use geofilter::cli::Cli;
use geofilter::geo::MaxMindOpener;
use geofilter::logging::init_logger;
use geofilter::{GeoFilter, ProxyConfig};

fn build(cli: Cli) -> Result<Server> {
    let config = ProxyConfig::from_settings(cli.into_settings()).context("invalid configuration")?;
    let database = config.database().display().to_string();

    let mut filter = GeoFilter::open(config, Arc::new(MaxMindOpener))
        .with_context(|| format!("failed to load Geo DB from {database}"))?;
    filter
        .watch()
        .with_context(|| format!("failed to watch {database} for changes"))?;

    filter.into_server().context("failed to create server")
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logger(cli.log_level) {
        eprintln!("failed to initialize logger: {e}");
    }

    match build(cli) {
        Ok(server) => server.run_forever(),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
