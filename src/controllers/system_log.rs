use super::require_permission;
use crate::error::AppError;
use crate::identity::{AccessCredentials, Catalog};
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use crate::store::LogFilter;
use crate::utils::value_to_string;
use log::debug;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 999_999;

/// Read side of the audit trail written by the `log` middleware.
pub struct SystemLogController {
    services: Arc<Services>,
}

impl SystemLogController {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// `system-log/list`
    pub fn list(&self, request: &mut Request, mut response: Response) -> Result<Response, AppError> {
        if !require_permission(request, &mut response, "mes_system_log", "read") {
            return Ok(response);
        }

        let page = request.data_i64("page").filter(|p| *p != 0).unwrap_or(DEFAULT_PAGE);
        let limit = request.data_i64("limit").filter(|l| *l != 0).unwrap_or(DEFAULT_LIMIT);
        if page < 1 {
            response.bad_request("Page must be ≥ 1");
            return Ok(response);
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            response.bad_request("Limit must be between 1-999999");
            return Ok(response);
        }

        let filter = LogFilter {
            plant_id: request.data_str("plantId"),
            module: request.data_str("module"),
            created_by: request.data_str("userId"),
            date_from: request.data_str("dateFrom"),
            date_to: request.data_str("dateTo"),
            search: request.data_str("search"),
            ip_address: request.data_str("ipAddress"),
        };

        let plant_codes = self.plant_codes(request)?;
        let store = self.services.databases.for_request(request)?;
        let mut result = store.find_logs(&filter, page as u64, limit as u64)?;
        for entry in &mut result.items {
            let code = entry
                .lp_plant_db_code
                .as_deref()
                .and_then(|db_code| plant_codes.get(db_code))
                .cloned()
                .unwrap_or_default();
            entry.lp_plant_code = Some(code);
        }

        let pages = result.pages();
        response.success(
            Some(json!({
                "logs": result.items,
                "total": result.total,
                "page": result.page,
                "limit": result.limit,
                "pages": pages,
            })),
            "System logs retrieved successfully",
        );
        Ok(response)
    }

    /// `plant_db_code -> plant_code` from the platform; empty when the platform
    /// refuses.
    fn plant_codes(&self, request: &Request) -> Result<HashMap<String, String>, AppError> {
        let credentials = AccessCredentials::from_request(request);
        let result = self
            .services
            .administration
            .list_to_select(Catalog::Plant, &credentials)?;
        if !result.is_ok() {
            debug!("Plant list unavailable: {}", result.message);
            return Ok(HashMap::new());
        }
        Ok(plant_code_map(&result.data))
    }
}

fn plant_code_map(data: &Value) -> HashMap<String, String> {
    data.as_array()
        .into_iter()
        .flatten()
        .filter_map(|plant| {
            let db_code = value_to_string(&plant["plant_db_code"])?;
            let code = value_to_string(&plant["plant_code"]).unwrap_or_default();
            Some((db_code, code))
        })
        .collect()
}
