//! Route table of the service.

use crate::controllers::{
    NotificationCenterController, PlatformController, SystemLogController, UserController,
};
use crate::error::AppError;
use crate::middleware;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Router, action};
use crate::services::Services;
use crate::utils::now_timestamp;
use serde_json::json;
use std::sync::Arc;

/// Version prefix of every API route.
pub const API_PREFIX: &str = "/api/v1";

/// Build the router with every controller bound, the bundled middleware
/// registered and the configured global middleware, base path and CORS
/// policy applied.
pub fn build_router(services: &Arc<Services>) -> Result<Router, AppError> {
    let config = &services.config;
    let mut router = Router::new();
    router
        .set_base_path(&config.base_path)
        .set_cors(config.cors.clone())
        .add_global_middleware(&config.global_middleware);
    middleware::register_defaults(router.middleware_registry_mut(), services);
    router.set_not_found_handler(
        |_: &mut Request, mut response: Response| -> Result<Response, AppError> {
            response.set_status_code(404);
            response.json(json!({
                "success": false,
                "message": "Resource not found",
                "error": "Not Found",
                "status_code": 404,
            }));
            Ok(response)
        },
    );

    let users = Arc::new(UserController::new(Arc::clone(services)));
    let platform = Arc::new(PlatformController::new(Arc::clone(services)));
    let system_log = Arc::new(SystemLogController::new(Arc::clone(services)));
    let notifications = Arc::new(NotificationCenterController::new(Arc::clone(services)));

    router.get("/health", health)?.name("health")?;

    router.group(API_PREFIX, &[] as &[&str], |r| {
        r.group("auth", &[] as &[&str], |r| {
            r.post("login", action(&users, UserController::login))?
                .with_middleware(&["log"])
                .name("auth.login")?;
            r.post("logout", action(&users, UserController::logout))?
                .with_middleware(&["log"])
                .name("auth.logout")?;
            r.post(
                "verify-platform-access-token",
                action(&users, UserController::verify_platform_access_token),
            )?
            .with_middleware(&["log"])
            .name("auth.verify-platform-access-token")?;
            r.post(
                "verify-redirect",
                action(&users, UserController::verify_platform_access_token),
            )?
            .name("auth.verify-redirect")?;
            r.post(
                "get-platform-access-token",
                action(&users, UserController::get_platform_access_token),
            )?
            .with_middleware(&["basic"])
            .name("auth.get-platform-access-token")?;
            Ok(())
        })?;

        r.group("", &["basic"], |r| {
            r.post(
                "plant/plant-list-to-select",
                action(&platform, PlatformController::plant_list),
            )?;
            r.post(
                "site/site-list-to-select",
                action(&platform, PlatformController::site_list),
            )?;
            r.post(
                "building/building-list-to-select",
                action(&platform, PlatformController::building_list),
            )?;
            r.post(
                "entity/entity-list-to-select",
                action(&platform, PlatformController::entity_list),
            )?;
            r.post(
                "user/user-list-to-select",
                action(&platform, PlatformController::user_list),
            )?;
            r.post(
                "user/get-user-plant-list",
                action(&platform, PlatformController::user_plant_list),
            )?;
            r.post(
                "user/get-user-profile",
                action(&platform, PlatformController::user_profile),
            )?;
            r.post(
                "user/get-platform-list",
                action(&platform, PlatformController::platform_list),
            )?;
            Ok(())
        })?;

        r.group("", &["auth"], |r| {
            r.post("system-log/list", action(&system_log, SystemLogController::list))?
                .name("system-log.list")?;

            r.group("notification-center", &[] as &[&str], |r| {
                r.post("list", action(&notifications, NotificationCenterController::list))?
                    .name("notification-center.list")?;
                r.post(
                    "create",
                    action(&notifications, NotificationCenterController::create),
                )?
                .with_middleware(&["log"])
                .name("notification-center.create")?;
                r.post("get", action(&notifications, NotificationCenterController::get))?
                    .name("notification-center.get")?;
                r.post(
                    "update",
                    action(&notifications, NotificationCenterController::update),
                )?
                .with_middleware(&["log"])
                .name("notification-center.update")?;
                r.post(
                    "delete",
                    action(&notifications, NotificationCenterController::delete),
                )?
                .with_middleware(&["log"])
                .name("notification-center.delete")?;
                Ok(())
            })?;
            Ok(())
        })?;
        Ok(())
    })?;

    Ok(router)
}

fn health(_: &mut Request, mut response: Response) -> Result<Response, AppError> {
    response.json(json!({
        "status": "ok",
        "timestamp": now_timestamp(),
    }));
    Ok(response)
}
