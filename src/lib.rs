/// # Portico
///
/// A small synchronous HTTP API framework and the service built on it.
///
/// Requests are matched against compiled path patterns, run through a named
/// middleware chain and answered with a `{status_code, message, data}`
/// envelope. Authentication is delegated to a remote identity service; the
/// controllers under [`controllers`] implement the `/api/v1` surface.
pub mod app;
pub mod cli;
pub mod config;
pub mod controllers;
pub mod error;
pub mod http;
pub mod identity;
pub mod middleware;
pub mod multipart;
pub mod request;
pub mod response;
pub mod router;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod utils;
pub mod validation;

use crate::app::App;
use crate::cli::Cli;
use crate::config::Config;
use crate::services::Services;
use clap::Parser;
use log::error;
use std::sync::Arc;

/// Parses the command line, initialises logging and serves until the process
/// is stopped.
pub fn run() {
    let cli = Cli::parse();

    // CLI > INI > defaults
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = config.log_level();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
    log::debug!("Log level set to: {log_level}");

    if config.verbose {
        config.print_summary();
    }

    if let Err(e) = cli.validate() {
        error!("Configuration validation error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = serve(config) {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}

fn serve(config: Config) -> Result<(), error::AppError> {
    let services = Arc::new(Services::from_config(config.clone())?);
    let app = Arc::new(App::from_services(services)?);
    server::run_server(app, &config, None, None)
}
