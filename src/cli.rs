use crate::config::Environment;
use crate::error::AppError;
use clap::Parser;
use log::warn;
use std::path::PathBuf;

/// Command-line flags. Every flag is optional and, when given, overrides the
/// matching INI key.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "portico",
    version,
    about = "A small HTTP API service with pattern routing, middleware chains and a remote identity service.",
    long_about = "Portico serves a JSON API under /api/v1. Requests are routed by method and path pattern, \
run through named middleware (token auth, tenant selection, audit logging, security headers) \
and answered with a uniform {status_code, message, data} envelope.\n\
Settings are read from portico.ini, ~/.config/portico/config.ini or /etc/portico/config.ini; \
flags given here take precedence."
)]
pub struct Cli {
    /// Host address to listen on
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Application environment
    #[arg(short, long, value_enum)]
    pub environment: Option<Environment>,

    /// Attach error details to 500 responses
    #[arg(long)]
    pub debug: Option<bool>,

    /// Path prefix stripped from every request before routing (e.g. /portico)
    #[arg(long)]
    pub base_path: Option<String>,

    /// Base URL of the administration / identity service
    #[arg(long)]
    pub administration_url: Option<String>,

    /// Enable verbose logging (log level: debug)
    #[arg(short, long)]
    pub verbose: Option<bool>,

    /// Enable request logging (log level: info)
    #[arg(long)]
    pub detailed_logging: Option<bool>,

    /// Configuration file path (INI format)
    #[arg(long, value_parser = validate_config_file)]
    pub config_file: Option<String>,
}

/// Validate config file path exists and is readable
fn validate_config_file(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("Config file path cannot be empty".to_string());
    }

    let path = PathBuf::from(s);
    if !path.exists() {
        return Err(format!("Config file does not exist: {s}"));
    }
    if !path.is_file() {
        return Err(format!("Config path is not a file: {s}"));
    }

    match std::fs::File::open(&path) {
        Ok(_) => Ok(s.to_string()),
        Err(e) => Err(format!("Cannot read config file {s}: {e}")),
    }
}

impl Cli {
    /// Sanity checks that clap cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.threads == Some(0) {
            return Err(AppError::configuration("threads must be at least 1"));
        }

        if let Some(base_path) = &self.base_path
            && !base_path.is_empty()
            && !base_path.starts_with('/')
        {
            return Err(AppError::configuration(format!(
                "base path must start with '/': {base_path}"
            )));
        }

        if let Some(url) = &self.administration_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(AppError::configuration(format!(
                "administration url must be http(s): {url}"
            )));
        }

        if self.environment == Some(Environment::Production) && self.debug == Some(true) {
            warn!("Debug output is enabled in production; error details will reach clients");
        }

        Ok(())
    }
}
