// SPDX-License-Identifier: MIT

use super::auth::verify_login;
use super::{Middleware, Next};
use crate::error::AppError;
use crate::identity::AccessCredentials;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::validation::{Rule, Rules};
use log::debug;
use std::sync::Arc;

/// `basic`: like `auth`, but missing credentials are a validation failure and
/// the caller's tenant connection is selected before the token lookup.
pub struct BasicMiddleware {
    services: Arc<Services>,
}

impl BasicMiddleware {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

impl Middleware for BasicMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        mut response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let rules = Rules::new()
            .field("accessUsername", [Rule::Required])
            .field("accessToken", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let credentials = AccessCredentials::from_request(request);
        if let Some(connection) = self.services.tenants.active_connection(&credentials.username) {
            debug!(
                "Selecting tenant connection {connection} for {}",
                credentials.username
            );
            request.select_connection(connection);
        }

        verify_login(&self.services, request, response, next, credentials)
    }
}
