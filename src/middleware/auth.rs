// SPDX-License-Identifier: MIT

//! Token authentication against the identity service.

use super::{Middleware, Next};
use crate::error::AppError;
use crate::identity::AccessCredentials;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use log::{debug, trace};
use std::sync::Arc;

/// `auth`: requires `accessUsername` + `accessToken`, checks the stored login
/// and asks the identity service who the caller is.
pub struct AuthMiddleware {
    services: Arc<Services>,
}

impl AuthMiddleware {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

impl Middleware for AuthMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        mut response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let (Some(username), Some(token)) = (
            request.data_str("accessUsername"),
            request.data_str("accessToken"),
        ) else {
            debug!("Missing access credentials for {}", request.path());
            response.unauthorized("Authentication required");
            return Ok(response);
        };

        verify_login(
            &self.services,
            request,
            response,
            next,
            AccessCredentials::new(username, token),
        )
    }
}

/// Look the token up in the request's connection, confirm it with
/// `account/me` and attach the returned identity as the principal.
pub(super) fn verify_login(
    services: &Services,
    request: &mut Request,
    mut response: Response,
    next: Next<'_>,
    credentials: AccessCredentials,
) -> Result<Response, AppError> {
    let store = services.databases.for_request(request)?;
    let Some(login) = store.find_login_by_token(&credentials.token)? else {
        debug!("No login record for token of {}", credentials.username);
        response.unauthorized("Invalid token");
        return Ok(response);
    };

    let result = services.administration.me(
        &credentials,
        login.pl_db_code.as_deref(),
        &login.lu_db_code,
    )?;
    if !result.is_ok() {
        debug!(
            "Identity service rejected {}: {} {}",
            credentials.username, result.status_code, result.message
        );
        result.relay(&mut response);
        return Ok(response);
    }

    trace!("Authenticated {}", credentials.username);
    request.set_principal(result.data)?;
    next.run(request, response)
}
