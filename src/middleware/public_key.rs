// SPDX-License-Identifier: MIT

use super::{Middleware, Next};
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::validation::{Rule, Rules};
use log::{debug, info};
use std::sync::Arc;

/// `publicKey`: verifies `publicAccessKey` for `accessUsername` and, when the
/// caller names a `connectionName`, records it as the user's tenant
/// connection and uses it for this request.
pub struct PublicKeyMiddleware {
    services: Arc<Services>,
}

impl PublicKeyMiddleware {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

impl Middleware for PublicKeyMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        mut response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let rules = Rules::new()
            .field("accessUsername", [Rule::Required])
            .field("publicAccessKey", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let username = request.data_str("accessUsername").unwrap_or_default();
        let key = request.data_str("publicAccessKey").unwrap_or_default();
        let result = self
            .services
            .administration
            .verify_public_access_key(&username, &key)?;
        if !result.is_ok() {
            debug!("Public access key rejected for {username}");
            result.relay(&mut response);
            return Ok(response);
        }

        if let Some(connection) = request.data_str("connectionName") {
            if !self.services.databases.contains(&connection) {
                response.bad_request(format!("Unknown connection: {connection}"));
                return Ok(response);
            }
            self.services
                .tenants
                .set_active_connection(&username, &connection)?;
            info!("Tenant connection for {username} is now {connection}");
            request.select_connection(connection);
        }

        next.run(request, response)
    }
}
