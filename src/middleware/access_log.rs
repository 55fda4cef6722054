// SPDX-License-Identifier: MIT

use super::{Middleware, Next, is_sensitive};
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use log::{debug, info, log_enabled, warn};
use serde_json::{Map, Value};
use std::time::Instant;

pub(crate) const REDACTED: &str = "***REDACTED***";

/// `access_log`: one line per request with status and elapsed time, plus the
/// redacted input at debug level.
pub struct AccessLogMiddleware {
    started: Instant,
}

impl AccessLogMiddleware {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for AccessLogMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for AccessLogMiddleware {
    fn handle(
        &self,
        request: &mut Request,
        response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        let method = request.method();
        let path = request.path().to_string();
        if log_enabled!(log::Level::Debug) {
            debug!(
                "{method} {path} from {} input {}",
                request.client_ip(),
                Value::Object(redact(request.all()))
            );
        }

        let result = next.run(request, response);
        let elapsed = self.started.elapsed();
        match &result {
            Ok(response) => info!(
                "{method} {path} -> {} ({elapsed:?})",
                response.status_code()
            ),
            Err(e) => warn!("{method} {path} failed after {elapsed:?}: {e}"),
        }
        result
    }
}

/// Replace sensitive values at any depth.
pub(crate) fn redact(data: Map<String, Value>) -> Map<String, Value> {
    data.into_iter()
        .map(|(key, value)| {
            let value = if is_sensitive(&key) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key, value)
        })
        .collect()
}

fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_nested() {
        let input = json!({
            "accessUsername": "jane",
            "accessToken": "abc",
            "profile": {"password": "p", "name": "Jane"},
            "items": [{"apiKey": "k", "id": 1}]
        });
        let Value::Object(map) = input else {
            unreachable!()
        };
        let redacted = Value::Object(redact(map));
        assert_eq!(redacted["accessUsername"], "jane");
        assert_eq!(redacted["accessToken"], REDACTED);
        assert_eq!(redacted["profile"]["password"], REDACTED);
        assert_eq!(redacted["profile"]["name"], "Jane");
        assert_eq!(redacted["items"][0]["apiKey"], REDACTED);
        assert_eq!(redacted["items"][0]["id"], 1);
    }

    #[test]
    fn test_passes_result_through() {
        let chain: Vec<Box<dyn Middleware>> = vec![Box::new(AccessLogMiddleware::new())];
        let failing = |_: &mut Request, _: Response| -> Result<Response, AppError> {
            Err(AppError::internal("boom"))
        };
        let mut request = Request::builder("GET", "/x").build().unwrap();
        assert!(matches!(
            crate::middleware::execute(&chain, &mut request, Response::new(), &failing),
            Err(AppError::Internal(_))
        ));
    }
}
