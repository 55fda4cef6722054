//! Application boundary: one request in, one response out.

use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::routes::build_router;
use crate::services::Services;
use log::{error, warn};
use std::sync::Arc;

pub struct App {
    router: Router,
    services: Arc<Services>,
}

impl App {
    /// Fails when a route or the global list names unregistered middleware.
    pub fn new(router: Router, services: Arc<Services>) -> Result<Self, AppError> {
        router.verify()?;
        Ok(Self { router, services })
    }

    /// The service with every route bound to `services`.
    pub fn from_services(services: Arc<Services>) -> Result<Self, AppError> {
        let router = build_router(&services)?;
        Self::new(router, services)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Dispatch `request`. Faults become the generic failure envelope.
    pub fn handle(&self, request: &mut Request) -> Response {
        let config = &self.services.config;
        let response = Response::new().with_error_details(!config.is_production());
        match self.router.dispatch(request, response) {
            Ok(response) => response,
            Err(e) => {
                if e.is_client_error() {
                    warn!("{} {} rejected: {e}", request.method(), request.path());
                } else {
                    error!("{} {} failed: {e}", request.method(), request.path());
                }
                e.to_response(config.debug)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::GENERIC_FAILURE_MESSAGE;

    fn services(debug: bool) -> Arc<Services> {
        let config = Config {
            debug,
            ..Config::default()
        };
        Arc::new(Services::from_config(config).unwrap())
    }

    #[test]
    fn test_unknown_middleware_is_rejected_at_startup() {
        let services = services(true);
        let mut router = Router::new();
        router
            .post("/x", |_: &mut Request, res: Response| -> Result<Response, AppError> {
                Ok(res)
            })
            .unwrap()
            .with_middleware(&["missing"]);
        assert!(matches!(
            App::new(router, services),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_faults_become_generic_envelope() {
        for debug in [true, false] {
            let services = services(debug);
            let mut router = Router::new();
            router
                .get("/boom", |_: &mut Request, _: Response| -> Result<Response, AppError> {
                    Err(AppError::database("connection lost"))
                })
                .unwrap();
            let app = App::new(router, services).unwrap();

            let mut request = Request::builder("GET", "/boom").build().unwrap();
            let response = app.handle(&mut request);
            assert_eq!(response.status_code(), 500);
            let body = response.json_body().unwrap();
            assert_eq!(body["message"], GENERIC_FAILURE_MESSAGE);
            assert_eq!(body.get("debug").is_some(), debug);
        }
    }
}
