//! Configuration management for Portico
//! Supports INI files with CLI argument overrides

pub mod ini_parser;

use crate::cli::Cli;
use crate::error::AppError;
use crate::http::DEFAULT_MAX_BODY_SIZE;
use ini_parser::IniConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(AppError::configuration(format!("unknown environment: {other}"))),
        }
    }
}

/// Cross-origin policy applied by the `cors` middleware and preflight answers.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<glob::Pattern>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age: u64,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: glob::Pattern::new("*").into_iter().collect(),
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Content-Type", "Authorization"]
                .map(String::from)
                .to_vec(),
            max_age: 86400,
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    /// Value for `Access-Control-Allow-Origin`, or `None` when the origin is
    /// refused. A request without `Origin` only gets `*` from a wildcard policy.
    pub fn allowed_origin(&self, origin: Option<&str>) -> Option<String> {
        match origin {
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|pattern| pattern.matches(origin))
                .then(|| origin.to_string()),
            None => self
                .allowed_origins
                .iter()
                .any(|pattern| pattern.as_str() == "*")
                .then(|| "*".to_string()),
        }
    }

    fn from_ini(ini: &IniConfig) -> Result<Self, AppError> {
        let mut cors = Self::default();
        let origins = ini.get_list("cors", "allowed_origins");
        if !origins.is_empty() {
            cors.allowed_origins = origins
                .iter()
                .map(|origin| glob::Pattern::new(origin))
                .collect::<Result<_, _>>()?;
        }
        let methods = ini.get_list("cors", "allowed_methods");
        if !methods.is_empty() {
            cors.allowed_methods = methods.iter().map(|m| m.to_uppercase()).collect();
        }
        let headers = ini.get_list("cors", "allowed_headers");
        if !headers.is_empty() {
            cors.allowed_headers = headers;
        }
        if let Some(max_age) = ini.get_u64("cors", "max_age") {
            cors.max_age = max_age;
        }
        cors.allow_credentials =
            ini.get_bool_or("cors", "allow_credentials", cors.allow_credentials);
        Ok(cors)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub listen: String,
    pub port: u16,
    pub threads: usize,
    pub max_body_size: usize,
    pub read_timeout: Duration,

    // Application settings
    pub name: String,
    pub environment: Environment,
    pub debug: bool,
    pub base_path: String,
    pub platform: String,

    // Identity service
    pub administration_url: String,
    pub identity_timeout: Duration,

    pub global_middleware: Vec<String>,
    pub cors: CorsConfig,

    // Persistence
    pub default_connection: String,
    pub connections: Vec<String>,

    // Logging settings
    pub verbose: bool,
    pub detailed_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: 8080,
            threads: 8,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            read_timeout: Duration::from_secs(30),
            name: "Portico".to_string(),
            environment: Environment::Development,
            debug: true,
            base_path: String::new(),
            platform: "admin".to_string(),
            administration_url: "http://127.0.0.1:8082".to_string(),
            identity_timeout: Duration::from_secs(10),
            global_middleware: Vec::new(),
            cors: CorsConfig::default(),
            default_connection: "default".to_string(),
            connections: vec!["default".to_string()],
            verbose: false,
            detailed_logging: false,
        }
    }
}

impl Config {
    /// Load configuration with precedence: CLI args > INI file > Defaults
    pub fn load(cli: &Cli) -> Result<Self, AppError> {
        let ini = match Self::find_config_file(cli)? {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                IniConfig::load_file(&path)?
            }
            None => {
                log::info!("No configuration file found, using defaults and CLI overrides");
                IniConfig::new()
            }
        };
        Self::from_sources(&ini, cli)
    }

    /// Merge an already parsed INI document with CLI overrides.
    pub fn from_sources(ini: &IniConfig, cli: &Cli) -> Result<Self, AppError> {
        let defaults = Self::default();

        let environment = match (cli.environment, ini.get_string("app", "environment")) {
            (Some(environment), _) => environment,
            (None, Some(value)) => value.parse()?,
            (None, None) => defaults.environment,
        };
        // Debug defaults to off in production
        let debug_default = environment != Environment::Production;

        let default_connection = ini
            .get_string("database", "default")
            .unwrap_or(defaults.default_connection);
        let mut connections = ini.get_list("database", "connections");
        if !connections.contains(&default_connection) {
            connections.insert(0, default_connection.clone());
        }

        let config = Self {
            listen: cli
                .listen
                .clone()
                .or_else(|| ini.get_string("server", "listen"))
                .unwrap_or(defaults.listen),
            port: cli
                .port
                .or_else(|| ini.get_u16("server", "port"))
                .unwrap_or(defaults.port),
            threads: cli
                .threads
                .or_else(|| ini.get_usize("server", "threads"))
                .unwrap_or(defaults.threads),
            max_body_size: ini
                .get_size("server", "max_body_size")
                .map(|size| size as usize)
                .unwrap_or(defaults.max_body_size),
            read_timeout: ini
                .get_duration("server", "read_timeout")
                .unwrap_or(defaults.read_timeout),

            name: ini.get_string("app", "name").unwrap_or(defaults.name),
            environment,
            debug: cli
                .debug
                .or_else(|| ini.get_bool("app", "debug"))
                .unwrap_or(debug_default),
            base_path: normalize_base_path(
                &cli.base_path
                    .clone()
                    .or_else(|| ini.get_string("app", "base_path"))
                    .unwrap_or_default(),
            ),
            platform: ini
                .get_string("app", "platform")
                .unwrap_or(defaults.platform),

            administration_url: cli
                .administration_url
                .clone()
                .or_else(|| ini.get_string("identity", "administration_url"))
                .unwrap_or(defaults.administration_url)
                .trim_end_matches('/')
                .to_string(),
            identity_timeout: ini
                .get_duration("identity", "timeout")
                .unwrap_or(defaults.identity_timeout),

            global_middleware: ini.get_list("middleware", "global"),
            cors: CorsConfig::from_ini(ini)?,

            default_connection,
            connections,

            verbose: cli
                .verbose
                .unwrap_or_else(|| ini.get_bool_or("logging", "verbose", false)),
            detailed_logging: cli
                .detailed_logging
                .unwrap_or_else(|| ini.get_bool_or("logging", "detailed_logging", false)),
        };

        if config.threads == 0 {
            return Err(AppError::configuration("threads must be at least 1"));
        }
        Ok(config)
    }

    /// Find configuration file in order of preference
    fn find_config_file(cli: &Cli) -> Result<Option<PathBuf>, AppError> {
        if let Some(config_path) = &cli.config_file {
            let path = PathBuf::from(config_path);
            return if path.exists() {
                Ok(Some(path))
            } else {
                Err(AppError::configuration(format!(
                    "Config file specified but not found: {config_path}"
                )))
            };
        }

        let current_config = PathBuf::from("portico.ini");
        if current_config.exists() {
            return Ok(Some(current_config));
        }

        if let Some(home_dir) = std::env::var_os("HOME") {
            let user_config = Path::new(&home_dir)
                .join(".config")
                .join("portico")
                .join("config.ini");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/portico/config.ini");
            if system_config.exists() {
                return Ok(Some(system_config));
            }
        }

        Ok(None)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Log level implied by the logging flags; `RUST_LOG` still wins.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.detailed_logging {
            "info"
        } else {
            "warn"
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        log::info!("Configuration Summary:");
        log::info!("  Application: {} ({})", self.name, self.environment);
        log::info!("  Server: {}:{}", self.listen, self.port);
        log::info!("  Threads: {}", self.threads);
        log::info!("  Max Body Size: {} bytes", self.max_body_size);
        log::info!(
            "  Base Path: {}",
            if self.base_path.is_empty() {
                "/"
            } else {
                &self.base_path
            }
        );
        log::info!("  Administration: {} (platform {})", self.administration_url, self.platform);
        log::info!("  Global Middleware: {:?}", self.global_middleware);
        log::info!(
            "  Connections: {:?} (default {})",
            self.connections,
            self.default_connection
        );
        log::info!("  Debug Output: {}", self.debug);
        log::info!("  Verbose Logging: {}", self.verbose);
        log::info!("  Detailed Logging: {}", self.detailed_logging);
    }
}

/// `/portico/` and `portico` both become `/portico`; `/` becomes empty.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
