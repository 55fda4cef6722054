// SPDX-License-Identifier: MIT

use super::{Middleware, Next};
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
    style-src 'self' 'unsafe-inline'; \
    img-src 'self' data:; \
    font-src 'self'; \
    connect-src 'self'; \
    media-src 'self'; \
    object-src 'none'; \
    frame-src 'self'; \
    base-uri 'self'; \
    form-action 'self'";

pub(crate) const SECURITY_HEADERS: [(&str, &str); 7] = [
    ("X-XSS-Protection", "1; mode=block"),
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "SAMEORIGIN"),
    (
        "Feature-Policy",
        "geolocation 'self'; microphone 'none'; camera 'none'",
    ),
    ("Content-Security-Policy", CONTENT_SECURITY_POLICY),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    (
        "Permissions-Policy",
        "camera=(), microphone=(), geolocation=(self)",
    ),
];

/// `security_headers`: adds the fixed header set to whatever the handler
/// produced.
pub struct SecurityHeadersMiddleware;

impl Middleware for SecurityHeadersMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let mut response = next.run(request, response)?;
        for (name, value) in SECURITY_HEADERS {
            response.set_header(name, value);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::execute;

    #[test]
    fn test_headers_added_after_handler() {
        let chain: Vec<Box<dyn Middleware>> = vec![Box::new(SecurityHeadersMiddleware)];
        let handler = |_: &mut Request, mut res: Response| -> Result<Response, AppError> {
            res.set_header("X-Frame-Options", "DENY");
            res.success(None, "ok");
            Ok(res)
        };
        let mut request = Request::builder("GET", "/").build().unwrap();
        let response = execute(&chain, &mut request, Response::new(), &handler).unwrap();

        assert_eq!(response.header("X-Frame-Options"), Some("SAMEORIGIN"));
        assert_eq!(response.header("X-Content-Type-Options"), Some("nosniff"));
        assert!(
            response
                .header("Content-Security-Policy")
                .is_some_and(|csp| csp.starts_with("default-src 'self'; script-src"))
        );
    }
}
