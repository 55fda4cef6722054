//! Client for the remote identity / administration service.
//!
//! Every call is a form POST to `administration_url + endpoint` answered with
//! the `{status_code, message, data}` envelope. A non-200 `status_code` is a
//! normal answer, not an error: callers relay it to their own client.

use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use log::{debug, warn};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Decoded identity service answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiResult {
    #[serde(deserialize_with = "status_from_number_or_string")]
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ApiResult {
    pub fn new<M: Into<String>>(status_code: u16, message: M, data: Value) -> Self {
        Self {
            status_code,
            message: message.into(),
            data,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// Put the service's status and message on `response` verbatim.
    pub fn relay(&self, response: &mut Response) {
        response.error(self.message.clone(), self.status_code, None);
    }
}

fn status_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| D::Error::custom(format!("status_code out of range: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("status_code is not numeric: {s:?}"))),
        other => Err(D::Error::custom(format!(
            "status_code must be a number, got {other}"
        ))),
    }
}

/// Transport to the identity service.
pub trait IdentityService: Send + Sync {
    fn call(&self, endpoint: &str, form: &[(&str, String)]) -> Result<ApiResult, AppError>;
}

/// Blocking HTTP implementation.
pub struct HttpIdentityService {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpIdentityService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("identity client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl IdentityService for HttpIdentityService {
    fn call(&self, endpoint: &str, form: &[(&str, String)]) -> Result<ApiResult, AppError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("Identity call {url}");

        let response = self.client.post(&url).form(form).send().map_err(|e| {
            warn!("Identity service unreachable at {url}: {e}");
            AppError::upstream(format!("identity service unreachable: {e}"))
        })?;
        let http_status = response.status();
        let body = response
            .text()
            .map_err(|e| AppError::upstream(format!("identity service read failed: {e}")))?;

        serde_json::from_str(&body).map_err(|e| {
            warn!("Identity service answered {http_status} with an undecodable body: {e}");
            AppError::upstream(format!("identity service returned an invalid response: {e}"))
        })
    }
}

/// `accessUsername` / `accessToken` pair forwarded on behalf of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessCredentials {
    pub username: String,
    pub token: String,
}

impl AccessCredentials {
    pub fn new<U: Into<String>, T: Into<String>>(username: U, token: T) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Read from the request body. Missing values are forwarded empty.
    pub fn from_request(request: &Request) -> Self {
        Self {
            username: request.data_str("accessUsername").unwrap_or_default(),
            token: request.data_str("accessToken").unwrap_or_default(),
        }
    }

    fn form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("accessUsername", self.username.clone()),
            ("accessToken", self.token.clone()),
        ]
    }
}

/// Lookup lists served by the administration platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    Plant,
    Site,
    Building,
    Entity,
    User,
}

impl Catalog {
    pub fn endpoint(self) -> &'static str {
        match self {
            Catalog::Plant => "/api/v1/plant/plant-list-to-select",
            Catalog::Site => "/api/v1/site/site-list-to-select",
            Catalog::Building => "/api/v1/building/building-list-to-select",
            Catalog::Entity => "/api/v1/entity/entity-list-to-select",
            Catalog::User => "/api/v1/user/user-list-to-select",
        }
    }
}

/// Typed administration API on top of an [`IdentityService`].
#[derive(Clone)]
pub struct Administration {
    service: Arc<dyn IdentityService>,
    platform: String,
}

impl std::fmt::Debug for Administration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Administration")
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl Administration {
    pub fn new<P: Into<String>>(service: Arc<dyn IdentityService>, platform: P) -> Self {
        Self {
            service,
            platform: platform.into(),
        }
    }

    /// Platform name sent with login and token checks.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn verify_account(&self, username: &str, password: &str) -> Result<ApiResult, AppError> {
        self.service.call(
            "/api/v1/account/verify",
            &[
                ("username", username.to_string()),
                ("password", password.to_string()),
                ("platform", self.platform.clone()),
                ("fromPlatform", "qa".to_string()),
            ],
        )
    }

    /// Token check for an existing login (`account/me`).
    pub fn me(
        &self,
        credentials: &AccessCredentials,
        pl_db_code: Option<&str>,
        lu_db_code: &str,
    ) -> Result<ApiResult, AppError> {
        let mut form = credentials.form();
        form.push(("plDbCode", pl_db_code.unwrap_or_default().to_string()));
        form.push(("luDbCode", lu_db_code.to_string()));
        form.push(("platform", self.platform.clone()));
        self.service.call("/api/v1/account/me", &form)
    }

    pub fn verify_secondary_password(
        &self,
        credentials: &AccessCredentials,
        secondary_password: &str,
    ) -> Result<ApiResult, AppError> {
        let mut form = credentials.form();
        form.push(("verifySecondaryPassword", secondary_password.to_string()));
        self.service
            .call("/api/v1/account/verify-secondary-password", &form)
    }

    pub fn verify_public_access_key(
        &self,
        username: &str,
        public_access_key: &str,
    ) -> Result<ApiResult, AppError> {
        self.service.call(
            "/api/v1/account/verify-public-access-key",
            &[
                ("accessUsername", username.to_string()),
                ("publicAccessKey", public_access_key.to_string()),
            ],
        )
    }

    pub fn verify_platform_access_token(&self, token: &str) -> Result<ApiResult, AppError> {
        self.service.call(
            "/api/v1/account/verify-platform-access-token",
            &[
                ("platformAccessToken", token.to_string()),
                ("platform", self.platform.clone()),
            ],
        )
    }

    pub fn get_platform_access_token(
        &self,
        credentials: &AccessCredentials,
    ) -> Result<ApiResult, AppError> {
        self.service
            .call("/api/v1/account/get-platform-access-token", &credentials.form())
    }

    pub fn logout(&self, credentials: &AccessCredentials) -> Result<ApiResult, AppError> {
        self.service.call("/api/v1/account/logout", &credentials.form())
    }

    pub fn list_to_select(
        &self,
        catalog: Catalog,
        credentials: &AccessCredentials,
    ) -> Result<ApiResult, AppError> {
        self.service.call(catalog.endpoint(), &credentials.form())
    }

    pub fn user_profile(&self, credentials: &AccessCredentials) -> Result<ApiResult, AppError> {
        self.service
            .call("/api/v1/user/get-user-profile", &credentials.form())
    }

    pub fn user_plant_list(&self, credentials: &AccessCredentials) -> Result<ApiResult, AppError> {
        self.service
            .call("/api/v1/user/get-user-plant-list", &credentials.form())
    }

    pub fn platform_list(
        &self,
        credentials: &AccessCredentials,
        current_platform_type: &str,
    ) -> Result<ApiResult, AppError> {
        let mut form = credentials.form();
        form.push(("currentPlatformType", current_platform_type.to_string()));
        self.service.call("/api/v1/user/get-platform-list", &form)
    }
}
