//! Domain controllers.
//!
//! Controllers hold the shared [`Services`] and expose actions with the
//! handler signature, bound to routes through [`crate::router::action`].
//! Expected outcomes (validation, permission, identity refusals) are
//! responses; only store and transport faults travel as `Err`.

mod notification_center;
mod platform;
mod system_log;
mod user;

pub use notification_center::NotificationCenterController;
pub use platform::PlatformController;
pub use system_log::SystemLogController;
pub use user::UserController;

use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::store::{Store, UserLogin};
use crate::utils::{now_timestamp, value_to_string};
use log::debug;
use serde_json::Value;

/// Read or write access to one permission area of the principal
/// (`user_access.<area>.<access>`).
pub(crate) fn has_permission(request: &Request, area: &str, access: &str) -> bool {
    let granted = request
        .principal()
        .map(|principal| &principal["user_access"][area][access]);
    match granted {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0",
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        _ => false,
    }
}

/// 401 "Permission denied" unless the principal holds the permission.
pub(crate) fn require_permission(
    request: &Request,
    response: &mut Response,
    area: &str,
    access: &str,
) -> bool {
    if has_permission(request, area, access) {
        return true;
    }
    debug!("Permission {area}.{access} denied on {}", request.path());
    response.unauthorized("Permission denied");
    false
}

/// Required string field of an identity answer.
pub(crate) fn required_field(data: &Value, field: &str) -> Result<String, AppError> {
    data.get(field)
        .and_then(value_to_string)
        .ok_or_else(|| AppError::upstream(format!("identity answer is missing {field}")))
}

/// Create or refresh the login record of `lu_db_code` with a new token.
/// Writes the failure envelope and returns `false` when the store refuses.
pub(crate) fn upsert_login(
    store: &dyn Store,
    response: &mut Response,
    lu_db_code: String,
    pl_db_code: Option<String>,
    access_token: String,
) -> Result<bool, AppError> {
    let last_login = now_timestamp();
    match store.find_login_by_user(&lu_db_code)? {
        Some(mut login) => {
            login.pl_db_code = pl_db_code;
            login.access_token = access_token;
            login.last_login = last_login;
            if !store.update_login(&login)? {
                response.error("Failed to update record", 500, None);
                return Ok(false);
            }
        }
        None => {
            store.create_login(UserLogin {
                id: 0,
                pl_db_code,
                lu_db_code,
                access_token,
                last_login,
            })?;
        }
    }
    Ok(true)
}
