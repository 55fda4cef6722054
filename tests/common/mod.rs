// SPDX-License-Identifier: MIT
//! Shared doubles for the integration tests.

#![allow(dead_code)]

use portico::app::App;
use portico::config::Config;
use portico::error::AppError;
use portico::identity::{ApiResult, IdentityService};
use portico::request::Request;
use portico::response::Response;
use portico::services::Services;
use portico::store::{Databases, UserLogin};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "jane";
pub const TOKEN: &str = "tok-123";
pub const LU_DB_CODE: &str = "LU-1";

/// Identity service answering from a per-endpoint script and recording every
/// call. Unscripted endpoints answer 404.
#[derive(Default)]
pub struct ScriptedIdentity {
    answers: Mutex<HashMap<String, ApiResult>>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, endpoint: &str, status_code: u16, message: &str, data: Value) {
        self.answers.lock().unwrap().insert(
            endpoint.to_string(),
            ApiResult::new(status_code, message, data),
        );
    }

    pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls().into_iter().map(|(endpoint, _)| endpoint).collect()
    }

    /// Form value of the last call to `endpoint`.
    pub fn sent(&self, endpoint: &str, field: &str) -> Option<String> {
        self.calls()
            .into_iter()
            .rev()
            .find(|(called, _)| called == endpoint)
            .and_then(|(_, form)| {
                form.into_iter()
                    .find(|(key, _)| key == field)
                    .map(|(_, value)| value)
            })
    }
}

impl IdentityService for ScriptedIdentity {
    fn call(&self, endpoint: &str, form: &[(&str, String)]) -> Result<ApiResult, AppError> {
        self.calls.lock().unwrap().push((
            endpoint.to_string(),
            form.iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        ));
        Ok(self
            .answers
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| ApiResult::new(404, "Not scripted", Value::Null)))
    }
}

pub fn config() -> Config {
    Config {
        connections: vec!["default".to_string(), "tenant_b".to_string()],
        ..Config::default()
    }
}

pub fn services_with(config: Config, identity: &Arc<ScriptedIdentity>) -> Arc<Services> {
    let databases = Databases::in_memory(&config);
    let identity: Arc<dyn IdentityService> = identity.clone();
    Arc::new(Services::new(config, identity, databases))
}

pub fn app_with(config: Config, identity: &Arc<ScriptedIdentity>) -> App {
    App::from_services(services_with(config, identity)).unwrap()
}

pub fn app(identity: &Arc<ScriptedIdentity>) -> App {
    app_with(config(), identity)
}

/// Store a login for [`USERNAME`] with [`TOKEN`] in `connection`.
pub fn seed_login(app: &App, connection: &str) {
    app.services()
        .databases
        .get(connection)
        .unwrap()
        .create_login(UserLogin {
            id: 0,
            pl_db_code: Some("PL-1".to_string()),
            lu_db_code: LU_DB_CODE.to_string(),
            access_token: TOKEN.to_string(),
            last_login: "2024-05-01 08:00:00".to_string(),
        })
        .unwrap();
}

/// Principal with the given permission areas granted for read and write.
pub fn principal(areas: &[&str]) -> Value {
    let access: serde_json::Map<String, Value> = areas
        .iter()
        .map(|area| (area.to_string(), json!({"read": 1, "write": 1})))
        .collect();
    json!({
        "lu_name": "Jane Doe",
        "lu_db_code": LU_DB_CODE,
        "user_access": access,
    })
}

/// `account/me` succeeds with `principal`.
pub fn accept_token(identity: &ScriptedIdentity, principal: Value) {
    identity.answer("/api/v1/account/me", 200, "User found", principal);
}

pub fn post(app: &App, path: &str, body: Value) -> Response {
    let mut request = Request::builder("POST", path).json(&body).build().unwrap();
    app.handle(&mut request)
}

/// POST with the standard access credentials merged into `body`.
pub fn post_authed(app: &App, path: &str, mut body: Value) -> Response {
    body["accessUsername"] = json!(USERNAME);
    body["accessToken"] = json!(TOKEN);
    post(app, path, body)
}

pub fn body(response: &Response) -> Value {
    response.json_body().cloned().unwrap_or(Value::Null)
}
