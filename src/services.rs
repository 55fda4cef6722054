//! Process-wide collaborators shared by controllers and middleware.

use crate::config::Config;
use crate::error::AppError;
use crate::identity::{Administration, HttpIdentityService, IdentityService};
use crate::store::{Databases, TenantDirectory};
use log::info;
use std::sync::Arc;

#[derive(Debug)]
pub struct Services {
    pub config: Config,
    pub administration: Administration,
    pub databases: Databases,
    pub tenants: TenantDirectory,
}

impl Services {
    pub fn new(config: Config, identity: Arc<dyn IdentityService>, databases: Databases) -> Self {
        let administration = Administration::new(identity, config.platform.clone());
        Self {
            config,
            administration,
            databases,
            tenants: TenantDirectory::new(),
        }
    }

    /// HTTP identity client and in-memory stores as configured.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let identity =
            HttpIdentityService::new(&config.administration_url, config.identity_timeout)?;
        let databases = Databases::in_memory(&config);
        info!(
            "Identity service at {} (platform {})",
            config.administration_url, config.platform
        );
        Ok(Self::new(config, Arc::new(identity), databases))
    }
}
