// SPDX-License-Identifier: MIT

//! Middleware chain for request pre- and post-processing.
//!
//! A middleware receives the live request and response plus a [`Next`]
//! continuation. Calling [`Next::run`] hands control to the rest of the chain
//! and finally to the route handler; returning without calling it
//! short-circuits the chain with whatever response the middleware built.
//!
//! Middleware are registered by name as factories and instantiated fresh for
//! every dispatch, so instances never carry state between requests.

mod access_log;
mod audit_log;
mod auth;
mod basic_auth;
mod cors;
mod public_key;
mod secondary_password;
mod security_headers;

pub use access_log::AccessLogMiddleware;
pub use audit_log::AuditLogMiddleware;
pub use auth::AuthMiddleware;
pub use basic_auth::BasicMiddleware;
pub use cors::CorsMiddleware;
pub use public_key::PublicKeyMiddleware;
pub use secondary_password::SecondaryPasswordMiddleware;
pub use security_headers::SecurityHeadersMiddleware;

use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::services::Services;
use log::trace;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Final step of a chain, normally the route handler.
pub type Terminal<'a> = &'a dyn Fn(&mut Request, Response) -> Result<Response, AppError>;

pub trait Middleware {
    fn handle(
        &self,
        request: &mut Request,
        response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError>;
}

impl<F> Middleware for F
where
    F: Fn(&mut Request, Response, Next<'_>) -> Result<Response, AppError>,
{
    fn handle(
        &self,
        request: &mut Request,
        response: Response,
        next: Next<'_>,
    ) -> Result<Response, AppError> {
        self(request, response, next)
    }
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    remaining: &'a [Box<dyn Middleware>],
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Box<dyn Middleware>], terminal: Terminal<'a>) -> Self {
        Self {
            remaining: chain,
            terminal,
        }
    }

    /// Invoke the next middleware, or the terminal once the chain is exhausted.
    pub fn run(self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        match self.remaining.split_first() {
            Some((current, rest)) => {
                trace!("Middleware step ({} remaining)", rest.len());
                current.handle(
                    request,
                    response,
                    Next {
                        remaining: rest,
                        terminal: self.terminal,
                    },
                )
            }
            None => {
                trace!("Middleware chain complete, invoking handler");
                (self.terminal)(request, response)
            }
        }
    }
}

/// Run `chain` around `terminal`. The first element runs first.
pub fn execute(
    chain: &[Box<dyn Middleware>],
    request: &mut Request,
    response: Response,
    terminal: Terminal<'_>,
) -> Result<Response, AppError> {
    Next::new(chain, terminal).run(request, response)
}

pub type MiddlewareFactory = Arc<dyn Fn() -> Box<dyn Middleware> + Send + Sync>;

/// Name to factory table used to resolve route middleware.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    factories: HashMap<String, MiddlewareFactory>,
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("MiddlewareRegistry")
            .field("names", &names)
            .finish()
    }
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N, F, M>(&mut self, name: N, factory: F)
    where
        N: Into<String>,
        F: Fn() -> M + Send + Sync + 'static,
        M: Middleware + 'static,
    {
        self.factories.insert(
            name.into(),
            Arc::new(move || Box::new(factory()) as Box<dyn Middleware>),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate `names` in order. An unknown name is a configuration fault.
    pub fn build(&self, names: &[String]) -> Result<Vec<Box<dyn Middleware>>, AppError> {
        names
            .iter()
            .map(|name| {
                self.factories
                    .get(name)
                    .map(|factory| factory())
                    .ok_or_else(|| AppError::configuration(format!("Unknown middleware: {name}")))
            })
            .collect()
    }
}

/// Register the bundled middleware under their route names.
pub fn register_defaults(registry: &mut MiddlewareRegistry, services: &Arc<Services>) {
    let s = Arc::clone(services);
    registry.register("auth", move || AuthMiddleware::new(Arc::clone(&s)));
    let s = Arc::clone(services);
    registry.register("basic", move || BasicMiddleware::new(Arc::clone(&s)));
    let s = Arc::clone(services);
    registry.register("verifyPw", move || {
        SecondaryPasswordMiddleware::new(Arc::clone(&s))
    });
    let s = Arc::clone(services);
    registry.register("publicKey", move || PublicKeyMiddleware::new(Arc::clone(&s)));
    let s = Arc::clone(services);
    registry.register("log", move || AuditLogMiddleware::new(Arc::clone(&s)));
    registry.register("security_headers", || SecurityHeadersMiddleware);
    let s = Arc::clone(services);
    registry.register("cors", move || CorsMiddleware::new(s.config.cors.clone()));
    registry.register("access_log", AccessLogMiddleware::new);
}

/// Field names whose values are withheld from logs.
const SENSITIVE_KEYS: [&str; 9] = [
    "password",
    "token",
    "accesstoken",
    "secret",
    "key",
    "publicaccesskey",
    "verifysecondarypassword",
    "authorization",
    "apikey",
];

pub(crate) fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| key == *sensitive || key.ends_with(sensitive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn request() -> Request {
        Request::builder("GET", "/").build().unwrap()
    }

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> Box<dyn Middleware> {
        let log = Rc::clone(log);
        Box::new(move |req: &mut Request, res: Response, next: Next<'_>| {
            log.borrow_mut().push(label);
            next.run(req, res)
        })
    }

    #[test]
    fn test_chain_runs_in_order_then_terminal() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let chain = vec![recorder(&log, "A"), recorder(&log, "B"), recorder(&log, "C")];
        let terminal_log = Rc::clone(&log);
        let terminal = move |_: &mut Request, mut res: Response| -> Result<Response, AppError> {
            terminal_log.borrow_mut().push("handler");
            res.success(None, "done");
            Ok(res)
        };

        let response = execute(&chain, &mut request(), Response::new(), &terminal).unwrap();
        assert_eq!(*log.borrow(), ["A", "B", "C", "handler"]);
        assert_eq!(response.envelope_message().as_deref(), Some("done"));
    }

    #[test]
    fn test_short_circuit_skips_rest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stop: Box<dyn Middleware> =
            Box::new(|_: &mut Request, mut res: Response, _: Next<'_>| -> Result<Response, AppError> {
                res.unauthorized("Authentication required");
                Ok(res)
            });
        let chain = vec![recorder(&log, "A"), stop, recorder(&log, "C")];
        let terminal = |_: &mut Request, _: Response| -> Result<Response, AppError> {
            panic!("handler must not run")
        };

        let response = execute(&chain, &mut request(), Response::new(), &terminal).unwrap();
        assert_eq!(*log.borrow(), ["A"]);
        assert_eq!(response.status_code(), 401);
    }

    #[test]
    fn test_after_middleware_sees_handler_response() {
        let after: Box<dyn Middleware> =
            Box::new(|req: &mut Request, res: Response, next: Next<'_>| {
                let mut res = next.run(req, res)?;
                res.set_header("X-Seen-Status", res.status_code().to_string());
                Ok(res)
            });
        let terminal = |_: &mut Request, mut res: Response| -> Result<Response, AppError> {
            res.not_found("nope");
            Ok(res)
        };
        let response = execute(&[after], &mut request(), Response::new(), &terminal).unwrap();
        assert_eq!(response.header("X-Seen-Status"), Some("404"));
    }

    #[test]
    fn test_empty_chain_calls_terminal() {
        let terminal = |_: &mut Request, mut res: Response| -> Result<Response, AppError> {
            res.set_status_code(204);
            Ok(res)
        };
        let response = execute(&[], &mut request(), Response::new(), &terminal).unwrap();
        assert_eq!(response.status_code(), 204);
    }

    #[test]
    fn test_registry_resolves_names() {
        let mut registry = MiddlewareRegistry::new();
        registry.register("security_headers", || SecurityHeadersMiddleware);
        assert!(registry.contains("security_headers"));
        assert_eq!(
            registry
                .build(&["security_headers".to_string()])
                .unwrap()
                .len(),
            1
        );
        assert!(matches!(
            registry.build(&["missing".to_string()]),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_sensitive_keys() {
        assert!(is_sensitive("password"));
        assert!(is_sensitive("accessToken"));
        assert!(is_sensitive("publicAccessKey"));
        assert!(is_sensitive("api_key"));
        assert!(!is_sensitive("username"));
    }
}
