// SPDX-License-Identifier: MIT

//! Audit trail of successful calls.
//!
//! Runs after the handler. A row is written only when the response envelope
//! reports `status_code` 200; failures to write are logged and never change
//! the response.

use super::{Middleware, Next};
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::store::SystemLogEntry;
use crate::utils::now_timestamp;
use log::{debug, error};
use std::sync::Arc;

const NO_MESSAGE: &str = "No message provided";
const GENERAL_SUBJECT: &str = "General Action";

/// Subjects reachable from a module segment.
const SUBJECTS: [(&str, &[(&str, &str)]); 2] = [
    ("user", &[("logout", "Logout")]),
    (
        "notification-center",
        &[
            ("create", "Create Notification"),
            ("update", "Update Notification"),
            ("delete", "Delete Notification"),
        ],
    ),
];

const MODULES: [(&str, &str); 2] = [("user", "user"), ("notification-center", "notification_center")];

/// `log`
pub struct AuditLogMiddleware {
    services: Arc<Services>,
}

impl AuditLogMiddleware {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    fn record(&self, request: &Request, response: &Response) -> Result<(), AppError> {
        let path = request.path();
        let entry = SystemLogEntry {
            id: 0,
            lp_plant_db_code: request.data_str("globalPlantDbCode"),
            lp_plant_code: None,
            ip_address: request.client_ip(),
            subject: subject_for(path).to_string(),
            content: response
                .envelope_message()
                .unwrap_or_else(|| NO_MESSAGE.to_string()),
            module: module_for(path).to_string(),
            created_datetime: now_timestamp(),
            created_by: actor_for(request, response),
        };
        debug!("Audit: {} by {} ({})", entry.subject, entry.created_by, entry.module);
        self.services
            .databases
            .for_request(request)?
            .create_log(entry)?;
        Ok(())
    }
}

impl Middleware for AuditLogMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let response = next.run(request, response)?;
        if response.envelope_status() == Some(200)
            && let Err(e) = self.record(request, &response)
        {
            error!("Error logging request {}: {e}", request.path());
        }
        Ok(response)
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').collect()
}

/// Walk the subject table from the first module segment; every remaining
/// segment must resolve.
pub(crate) fn subject_for(path: &str) -> &'static str {
    let segments = segments(path);
    let Some(start) = segments
        .iter()
        .position(|segment| SUBJECTS.iter().any(|(module, _)| module == segment))
    else {
        return GENERAL_SUBJECT;
    };

    match &segments[start..] {
        [module, action] => SUBJECTS
            .iter()
            .find(|(name, _)| name == module)
            .and_then(|(_, actions)| actions.iter().find(|(name, _)| name == action))
            .map(|(_, subject)| *subject)
            .unwrap_or(GENERAL_SUBJECT),
        _ => GENERAL_SUBJECT,
    }
}

pub(crate) fn module_for(path: &str) -> &'static str {
    segments(path)
        .iter()
        .find_map(|segment| {
            MODULES
                .iter()
                .find(|(name, _)| name == segment)
                .map(|(_, module)| *module)
        })
        .unwrap_or("general")
}

fn actor_for(request: &Request, response: &Response) -> String {
    let path = request.path();
    let actor = if path.contains("auth/login") {
        request.data_str("username")
    } else if path.contains("auth/verify-platform-access-token") {
        response
            .json_body()
            .and_then(|body| body["data"]["username"].as_str())
            .map(str::to_string)
    } else {
        request.data_str("accessUsername")
    };
    actor.unwrap_or_else(|| "guest".to_string())
}
