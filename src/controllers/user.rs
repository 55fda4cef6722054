use super::{required_field, upsert_login};
use crate::error::AppError;
use crate::identity::AccessCredentials;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::utils::{generate_token, value_to_string};
use crate::validation::{Rule, Rules};
use log::{debug, info};
use std::sync::Arc;

/// Length of the token written over a logged-out session.
const ROTATED_TOKEN_LENGTH: usize = 50;

/// Login, logout and platform token exchange.
pub struct UserController {
    services: Arc<Services>,
}

impl UserController {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// `auth/login`
    pub fn login(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        let rules = Rules::new()
            .field("username", [Rule::Required])
            .field("password", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let username = request.data_str("username").unwrap_or_default();
        let password = request.data_str("password").unwrap_or_default();
        let result = self
            .services
            .administration
            .verify_account(&username, &password)?;
        if !result.is_ok() {
            debug!("Login refused for {username}: {}", result.message);
            result.relay(&mut response);
            return Ok(response);
        }

        let store = self.services.databases.for_request(request)?;
        let stored = upsert_login(
            store.as_ref(),
            &mut response,
            required_field(&result.data, "db_code")?,
            result.data.get("pl_db_code").and_then(value_to_string),
            required_field(&result.data, "access_token")?,
        )?;
        if !stored {
            return Ok(response);
        }

        info!("User {username} logged in");
        response.success(Some(result.data), "Login successful");
        Ok(response)
    }

    /// `auth/verify-platform-access-token`
    pub fn verify_platform_access_token(
        &self,
        request: &mut Request,
        mut response: Response,
    ) -> Result<Response, AppError> {
        let rules = Rules::new().field("platformAccessToken", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let token = request.data_str("platformAccessToken").unwrap_or_default();
        let result = self
            .services
            .administration
            .verify_platform_access_token(&token)?;
        if !result.is_ok() {
            result.relay(&mut response);
            return Ok(response);
        }

        let store = self.services.databases.for_request(request)?;
        let stored = upsert_login(
            store.as_ref(),
            &mut response,
            required_field(&result.data, "db_code")?,
            result.data.get("pl_db_code").and_then(value_to_string),
            required_field(&result.data, "access_token")?,
        )?;
        if !stored {
            return Ok(response);
        }

        response.success(Some(result.data), "Access via token successful.");
        Ok(response)
    }

    /// `auth/get-platform-access-token`
    pub fn get_platform_access_token(
        &self,
        request: &mut Request,
        mut response: Response,
    ) -> Result<Response, AppError> {
        let credentials = AccessCredentials::from_request(request);
        let result = self
            .services
            .administration
            .get_platform_access_token(&credentials)?;
        if !result.is_ok() {
            result.relay(&mut response);
            return Ok(response);
        }

        response.success(
            Some(result.data),
            "The platform access token was generated successfully.",
        );
        Ok(response)
    }

    /// `auth/logout`: the stored token is overwritten so it can no longer
    /// authenticate, then the identity service is told. Its answer does not
    /// change the outcome.
    pub fn logout(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        let credentials = AccessCredentials::from_request(request);
        let store = self.services.databases.for_request(request)?;
        let Some(mut login) = store.find_login_by_token(&credentials.token)? else {
            response.unauthorized("Invalid token");
            return Ok(response);
        };

        login.access_token = generate_token(ROTATED_TOKEN_LENGTH);
        store.update_login(&login)?;

        let result = self.services.administration.logout(&credentials)?;
        if !result.is_ok() {
            debug!(
                "Identity logout for {} answered {}: {}",
                credentials.username, result.status_code, result.message
            );
        }

        info!("User {} logged out", credentials.username);
        response.success(None, "Logout successful");
        Ok(response)
    }
}
