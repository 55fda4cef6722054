use crate::error::AppError;
use crate::identity::{AccessCredentials, ApiResult, Catalog};
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::utils::value_to_string;
use crate::validation::{Rule, Rules};
use serde_json::Value;
use std::sync::Arc;

/// Lookups proxied to the administration platform on behalf of the caller.
pub struct PlatformController {
    services: Arc<Services>,
}

impl PlatformController {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn catalog(
        &self,
        catalog: Catalog,
        request: &Request,
        response: Response,
        message: &str,
    ) -> Result<Response, AppError> {
        let credentials = AccessCredentials::from_request(request);
        let result = self
            .services
            .administration
            .list_to_select(catalog, &credentials)?;
        Ok(reshape(result, response, message))
    }

    pub fn plant_list(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        self.catalog(Catalog::Plant, request, response, "Plants list retrieved successfully")
    }

    pub fn site_list(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        self.catalog(Catalog::Site, request, response, "Site information retrieved successfully")
    }

    pub fn building_list(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        self.catalog(Catalog::Building, request, response, "Building list retrieved successfully")
    }

    pub fn entity_list(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        self.catalog(Catalog::Entity, request, response, "Entity list retrieved successfully")
    }

    pub fn user_list(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        self.catalog(Catalog::User, request, response, "User list retrieved successfully")
    }

    pub fn user_plant_list(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        let credentials = AccessCredentials::from_request(request);
        let result = self.services.administration.user_plant_list(&credentials)?;
        Ok(reshape(result, response, "User Plant List found"))
    }

    /// Profile from the platform with `user.last_login` taken from the local
    /// login record (null when there is none).
    pub fn user_profile(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        let credentials = AccessCredentials::from_request(request);
        let mut result = self.services.administration.user_profile(&credentials)?;
        if !result.is_ok() {
            result.relay(&mut response);
            return Ok(response);
        }

        let db_code = result.data["user"]["db_code"].clone();
        let last_login = match value_to_string(&db_code) {
            Some(code) => self
                .services
                .databases
                .for_request(request)?
                .find_login_by_user(&code)?
                .map(|login| Value::String(login.last_login)),
            None => None,
        };
        if let Some(user) = result.data.get_mut("user").and_then(Value::as_object_mut) {
            user.insert("last_login".to_string(), last_login.unwrap_or(Value::Null));
        }

        response.success(Some(result.data), "User found");
        Ok(response)
    }

    pub fn platform_list(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        let rules = Rules::new().field("currentPlatformType", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let credentials = AccessCredentials::from_request(request);
        let platform_type = request.data_str("currentPlatformType").unwrap_or_default();
        let result = self
            .services
            .administration
            .platform_list(&credentials, &platform_type)?;
        Ok(reshape(result, response, "User platform list found"))
    }
}

/// Success envelope around the platform's `data`, or its refusal verbatim.
fn reshape(result: ApiResult, mut response: Response, message: &str) -> Response {
    if result.is_ok() {
        response.success(Some(result.data), message);
    } else {
        result.relay(&mut response);
    }
    response
}
