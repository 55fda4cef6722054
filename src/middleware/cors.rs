// SPDX-License-Identifier: MIT

use super::{Middleware, Next};
use crate::config::CorsConfig;
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;

/// `cors`: applies the configured policy for the request `Origin` once the
/// handler has answered.
pub struct CorsMiddleware {
    policy: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(policy: CorsConfig) -> Self {
        Self { policy }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let origin = request.header("origin").map(str::to_string);
        let mut response = next.run(request, response)?;
        response.enable_cors(&self.policy, origin.as_deref());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::execute;

    fn run(policy: CorsConfig, origin: Option<&str>) -> Response {
        let chain: Vec<Box<dyn Middleware>> = vec![Box::new(CorsMiddleware::new(policy))];
        let handler = |_: &mut Request, mut res: Response| -> Result<Response, AppError> {
            res.success(None, "ok");
            Ok(res)
        };
        let mut builder = Request::builder("GET", "/");
        if let Some(origin) = origin {
            builder = builder.header("Origin", origin);
        }
        let mut request = builder.build().unwrap();
        execute(&chain, &mut request, Response::new(), &handler).unwrap()
    }

    #[test]
    fn test_allowed_origin_gets_headers() {
        let policy = CorsConfig {
            allowed_origins: vec![glob::Pattern::new("https://*.example.com").unwrap()],
            ..CorsConfig::default()
        };
        let response = run(policy.clone(), Some("https://app.example.com"));
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://app.example.com")
        );

        let refused = run(policy, Some("https://evil.test"));
        assert_eq!(refused.header("Access-Control-Allow-Origin"), None);
        assert_eq!(refused.status_code(), 200);
    }
}
