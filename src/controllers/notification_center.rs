use super::require_permission;
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::store::{NotificationQuery, NotificationRecord, NotificationUpdate};
use crate::utils::{generate_db_code, now_timestamp, value_to_string};
use crate::validation::{Rule, Rules};
use log::{error, info};
use serde_json::{Value, json};
use std::sync::Arc;

const AREA: &str = "notification_center";
const MAX_LIMIT: i64 = 100;

/// CRUD over notification centre records. Deletion is soft (status -1).
pub struct NotificationCenterController {
    services: Arc<Services>,
}

impl NotificationCenterController {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// `notification-center/list`
    pub fn list(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        if !require_permission(request, &mut response, AREA, "read") {
            return Ok(response);
        }

        let page = request.data_i64("page").unwrap_or(0);
        let limit = request.data_i64("limit").unwrap_or(0);
        if page < 1 {
            response.bad_request("Page must be ≥ 1");
            return Ok(response);
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            response.bad_request("Limit must be between 1-100");
            return Ok(response);
        }

        let query = NotificationQuery {
            status: request.data_i64("status"),
            kind: request.data_str("type"),
            search: request.data_str("search"),
        };
        let store = self.services.databases.for_request(request)?;
        let result = store.find_notifications(&query, page as u64, limit as u64)?;
        let pages = result.pages();
        response.success(
            Some(json!({
                "notificationCenter": result.items,
                "total": result.total,
                "page": result.page,
                "limit": result.limit,
                "pages": pages,
            })),
            "Notification center records retrieved successfully",
        );
        Ok(response)
    }

    /// `notification-center/create`
    pub fn create(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        if !require_permission(request, &mut response, AREA, "write") {
            return Ok(response);
        }

        let rules = Rules::new()
            .field("type", [Rule::Required, Rule::Length(2, 20)])
            .field("title", [Rule::Required])
            .field("content", [Rule::Required])
            .field("recipientList", [Rule::Required]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let record = NotificationRecord {
            id: 0,
            db_code: generate_db_code(),
            kind: request.data_str("type").unwrap_or_default(),
            title: request.data_str("title").unwrap_or_default(),
            content: request.data_str("content").unwrap_or_default(),
            recipient_list: value_of(request, "recipientList"),
            lu_department: value_of(request, "luDepartment"),
            lp_plant_db_code: value_of(request, "lpPlantDbCode"),
            status: 1,
            created_datetime: now_timestamp(),
            created_by: author(request),
        };
        let db_code = record.db_code.clone();

        let store = self.services.databases.for_request(request)?;
        if let Err(e) = store.create_notification(record) {
            error!("Creating notification {db_code} failed: {e}");
            response.server_error("Failed to create notification center record");
            return Ok(response);
        }

        info!("Notification {db_code} created");
        response.created(None, "Notification center record created successfully");
        Ok(response)
    }

    /// `notification-center/get`
    pub fn get(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        if !require_permission(request, &mut response, AREA, "read") {
            return Ok(response);
        }

        let code = request.data_str("code").unwrap_or_default();
        let store = self.services.databases.for_request(request)?;
        match store.find_notification(&code)? {
            Some(record) => {
                response.success(
                    Some(json!({ "notificationCenter": record })),
                    "Notification center record found",
                );
            }
            None => {
                response.not_found("Notification center record not found");
            }
        }
        Ok(response)
    }

    /// `notification-center/update`: only the fields present in the request
    /// are written. A present `status` takes its value from `ncStatus`.
    pub fn update(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        if !require_permission(request, &mut response, AREA, "write") {
            return Ok(response);
        }

        let code = request.data_str("code").unwrap_or_default();
        let store = self.services.databases.for_request(request)?;
        if store.find_notification(&code)?.is_none() {
            response.not_found("Notification center record not found");
            return Ok(response);
        }

        if request.has("status") {
            let status = request.data_i64("ncStatus").unwrap_or(0);
            request.set_data("status", json!(status));
        }

        let rules = Rules::new()
            .field("type", [Rule::Required, Rule::Length(2, 20)])
            .field("title", [Rule::Required])
            .field("content", [Rule::Required])
            .field("status", [Rule::Required, Rule::Numeric]);
        if let Err(errors) = request.validate(&rules) {
            response.validation_error(&errors);
            return Ok(response);
        }

        let text = |field: &str| {
            request
                .has(field)
                .then(|| request.data_str(field).unwrap_or_default())
        };
        let value = |field: &str| request.has(field).then(|| value_of(request, field));
        let update = NotificationUpdate {
            kind: text("type"),
            title: text("title"),
            content: text("content"),
            recipient_list: value("recipientList"),
            lu_department: value("luDepartment"),
            lp_plant_db_code: value("lpPlantDbCode"),
            status: request.has("status").then(|| request.data_i64("status").unwrap_or(0)),
        };

        if !store.update_notification(&code, &update)? {
            response.server_error("Failed to update notification center record");
            return Ok(response);
        }

        response.success(None, "Notification center record updated successfully");
        Ok(response)
    }

    /// `notification-center/delete`
    pub fn delete(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        if !require_permission(request, &mut response, AREA, "write") {
            return Ok(response);
        }

        let code = request.data_str("code").unwrap_or_default();
        let store = self.services.databases.for_request(request)?;
        if store.find_notification(&code)?.is_none() {
            response.not_found("Notification center record not found");
            return Ok(response);
        }

        if !store.delete_notification(&code)? {
            response.server_error("Failed to delete notification center record");
            return Ok(response);
        }

        info!("Notification {code} deleted");
        response.success(None, "Notification center record deleted successfully");
        Ok(response)
    }
}

/// Body value with blanks stored as null.
fn value_of(request: &Request, field: &str) -> Value {
    request.get_data(field).cloned().unwrap_or(Value::Null)
}

fn author(request: &Request) -> String {
    request
        .principal()
        .and_then(|principal| value_to_string(&principal["lu_name"]))
        .unwrap_or_else(|| "system".to_string())
}
