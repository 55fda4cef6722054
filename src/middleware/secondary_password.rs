// SPDX-License-Identifier: MIT

use super::{Middleware, Next};
use crate::error::AppError;
use crate::identity::AccessCredentials;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::validation::{Rule, Rules};
use log::debug;
use std::sync::Arc;

/// `verifyPw`: step-up check of `verifySecondaryPassword`.
pub struct SecondaryPasswordMiddleware {
    services: Arc<Services>,
}

impl SecondaryPasswordMiddleware {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

impl Middleware for SecondaryPasswordMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        mut response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let rules = Rules::new().field("verifySecondaryPassword", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let credentials = AccessCredentials::from_request(request);
        let password = request
            .data_str("verifySecondaryPassword")
            .unwrap_or_default();
        let result = self
            .services
            .administration
            .verify_secondary_password(&credentials, &password)?;

        if result.is_ok() {
            next.run(request, response)
        } else {
            debug!("Secondary password rejected for {}", credentials.username);
            result.relay(&mut response);
            Ok(response)
        }
    }
}
