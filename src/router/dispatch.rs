use super::{Route, Router, canonical_path};
use crate::error::AppError;
use crate::http::Method;
use crate::middleware;
use crate::request::Request;
use crate::response::Response;
use log::{debug, trace};
use std::collections::BTreeMap;

impl Router {
    /// Resolve the request to a route and run its middleware chain.
    ///
    /// OPTIONS is answered from the route table. A path that matches only
    /// under other methods gets the 405 handler, an unknown path the 404
    /// handler. An unresolvable middleware name is a configuration error.
    pub fn dispatch(&self, request: &mut Request, response: Response) -> Result<Response, AppError> {
        let method = request.method();
        let path = self.normalize_path(request.path());
        trace!("Dispatching {method} {path}");

        if method == Method::Options {
            return self.preflight(request, response, &path);
        }

        if let Some((route, params)) = self.find_route(method, &path) {
            debug!("Route matched: {method} {path} -> {}", route.template());
            request.set_params(params);
            request.set_route_name(route.name.clone());

            let names: Vec<String> = self
                .global_middleware
                .iter()
                .chain(route.middleware.iter())
                .cloned()
                .collect();
            let chain = self.middleware.build(&names)?;
            return middleware::execute(&chain, request, response, &*route.handler);
        }

        let allowed = self.allowed_methods(&path);
        if !allowed.is_empty() {
            debug!("Method {method} not allowed for {path}");
            return (self.method_not_allowed)(request, response, &allowed);
        }

        debug!("No route for {method} {path}");
        (self.not_found)(request, response)
    }

    /// Strip the base path, then canonicalize.
    pub fn normalize_path(&self, path: &str) -> String {
        let path = path.split('?').next().unwrap_or_default();
        let stripped = match path.strip_prefix(self.base_path.as_str()) {
            Some(rest) if !self.base_path.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
                rest
            }
            _ => path,
        };
        canonical_path(stripped)
    }

    /// Routable methods (OPTIONS excluded) with at least one route matching
    /// `path`, in `Allow` order.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        Method::ROUTABLE
            .into_iter()
            .filter(|method| *method != Method::Options)
            .filter(|method| {
                self.routes
                    .get(method)
                    .is_some_and(|routes| routes.iter().any(|r| r.pattern.is_match(path)))
            })
            .collect()
    }

    fn find_route(&self, method: Method, path: &str) -> Option<(&Route, BTreeMap<String, String>)> {
        self.routes
            .get(&method)?
            .iter()
            .find_map(|route| route.pattern.captures(path).map(|params| (route, params)))
    }

    fn preflight(&self, request: &mut Request, mut response: Response, path: &str) -> Result<Response, AppError> {
        let mut allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            debug!("OPTIONS for unknown path {path}");
            return (self.not_found)(request, response);
        }
        allowed.push(Method::Options);
        response.handle_preflight(&self.cors, request.header("origin"), &allowed);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Next;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn ok_handler(label: &'static str) -> impl Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static {
        move |_request, mut response| {
            response.success(Some(json!(label)), "ok");
            Ok(response)
        }
    }

    fn dispatch(router: &Router, method: &str, target: &str) -> (Request, Response) {
        let mut request = Request::builder(method, target).build().unwrap();
        let response = router.dispatch(&mut request, Response::new()).unwrap();
        (request, response)
    }

    fn data(response: &Response) -> serde_json::Value {
        response.json_body().unwrap()["data"].clone()
    }

    #[test]
    fn test_first_registered_route_wins() {
        let mut router = Router::new();
        router.get("/items/:id", ok_handler("by-id")).unwrap();
        router.get("/items/:name", ok_handler("by-name")).unwrap();

        for _ in 0..3 {
            let (request, response) = dispatch(&router, "GET", "/items/42");
            assert_eq!(data(&response), json!("by-id"));
            assert_eq!(request.param("id"), Some("42"));
        }
        let (_, response) = dispatch(&router, "GET", "/items/abc");
        assert_eq!(data(&response), json!("by-name"));
    }

    #[test]
    fn test_options_lists_matching_methods() {
        let mut router = Router::new();
        router.get("/x", ok_handler("get")).unwrap();
        router.post("/x", ok_handler("post")).unwrap();
        router.delete("/y", ok_handler("delete")).unwrap();

        let (_, response) = dispatch(&router, "OPTIONS", "/x");
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("Allow"), Some("GET, POST, OPTIONS"));
        assert!(response.body_bytes().is_empty());

        let (_, missing) = dispatch(&router, "OPTIONS", "/nowhere");
        assert_eq!(missing.status_code(), 404);
    }

    #[test]
    fn test_method_not_allowed_versus_not_found() {
        let mut router = Router::new();
        router.get("/x", ok_handler("get")).unwrap();

        let (_, response) = dispatch(&router, "POST", "/x");
        assert_eq!(response.status_code(), 405);
        assert_eq!(response.header("Allow"), Some("GET"));
        assert_eq!(
            response.envelope_message().as_deref(),
            Some("Method not allowed: POST")
        );

        let (_, response) = dispatch(&router, "GET", "/y");
        assert_eq!(response.status_code(), 404);
        assert_eq!(
            response.envelope_message().as_deref(),
            Some("Route not found: /y")
        );
    }

    #[test]
    fn test_path_normalization() {
        let mut router = Router::new();
        router.set_base_path("/portico/");
        router.get("/api/v1/health", ok_handler("health")).unwrap();
        router.get("/", ok_handler("root")).unwrap();

        for target in [
            "/portico/api/v1/health",
            "/portico/api/v1/health/",
            "/api/v1/health?x=1",
            "//api//v1/health",
        ] {
            let (_, response) = dispatch(&router, "GET", target);
            assert_eq!(data(&response), json!("health"), "{target}");
        }
        let (_, response) = dispatch(&router, "GET", "/portico");
        assert_eq!(data(&response), json!("root"));
        assert_eq!(router.normalize_path("/porticox/a"), "/porticox/a");
    }

    #[test]
    fn test_middleware_order_global_group_route() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        for label in ["A", "B", "C"] {
            let order = Arc::clone(&order);
            router.register_middleware(label, move || {
                let order = Arc::clone(&order);
                move |req: &mut Request, res: Response, next: Next<'_>| {
                    order.lock().unwrap().push(label);
                    next.run(req, res)
                }
            });
        }
        router.add_global_middleware(&["A"]);
        let handler_order = Arc::clone(&order);
        router
            .group("/api", &["B"], |r| {
                r.get("/x", move |_req: &mut Request, mut res: Response| {
                    handler_order.lock().unwrap().push("handler");
                    res.success(None, "ok");
                    Ok(res)
                })?
                .with_middleware(&["C"]);
                Ok(())
            })
            .unwrap();

        let (_, response) = dispatch(&router, "GET", "/api/x");
        assert_eq!(response.status_code(), 200);
        assert_eq!(*order.lock().unwrap(), ["A", "B", "C", "handler"]);
    }

    #[test]
    fn test_short_circuit_prevents_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.register_middleware("deny", || {
            |_: &mut Request, mut res: Response, _: Next<'_>| -> Result<Response, AppError> {
                res.unauthorized("Invalid token");
                Ok(res)
            }
        });
        let counter = Arc::clone(&calls);
        router
            .any("/secret", move |_req: &mut Request, res: Response| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(res)
            })
            .unwrap()
            .with_middleware(&["deny"]);

        for method in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
            let (_, response) = dispatch(&router, method, "/secret");
            assert_eq!(response.status_code(), 401);
            assert_eq!(response.envelope_message().as_deref(), Some("Invalid token"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nested_groups_concatenate() {
        let mut router = Router::new();
        router.register_middleware("outer", || {
            |req: &mut Request, res: Response, next: Next<'_>| next.run(req, res)
        });
        router.register_middleware("inner", || {
            |req: &mut Request, res: Response, next: Next<'_>| next.run(req, res)
        });
        router
            .group("api", &["outer"], |r| {
                r.group("/v1/", &["inner"], |r| {
                    r.post("users/:id", ok_handler("user"))?;
                    Ok(())
                })?;
                r.get("/ping", ok_handler("ping"))?;
                Ok(())
            })
            .unwrap();
        router.get("/after", ok_handler("after")).unwrap();

        let routes: Vec<_> = router
            .routes()
            .map(|r| (r.method(), r.template().to_string(), r.middleware().to_vec()))
            .collect();
        assert!(routes.contains(&(
            Method::Post,
            "/api/v1/users/:id".to_string(),
            vec!["outer".to_string(), "inner".to_string()]
        )));
        assert!(routes.contains(&(Method::Get, "/api/ping".to_string(), vec!["outer".to_string()])));
        assert!(routes.contains(&(Method::Get, "/after".to_string(), Vec::new())));
    }

    #[test]
    fn test_group_error_restores_state() {
        let mut router = Router::new();
        let result = router.group("/broken", &["x"], |r| {
            r.get("/a[", ok_handler("a"))?;
            Ok(())
        });
        assert!(matches!(result, Err(AppError::InvalidPattern { .. })));
        router.get("/b", ok_handler("b")).unwrap();
        assert_eq!(router.routes().last().unwrap().template(), "/b");
        assert!(router.routes().last().unwrap().middleware().is_empty());
    }

    #[test]
    fn test_unknown_middleware_is_configuration_error() {
        let mut router = Router::new();
        router
            .get("/x", ok_handler("x"))
            .unwrap()
            .with_middleware(&["ghost"]);
        assert!(matches!(router.verify(), Err(AppError::Configuration(_))));

        let mut request = Request::builder("GET", "/x").build().unwrap();
        assert!(matches!(
            router.dispatch(&mut request, Response::new()),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_named_routes_and_url() {
        let mut router = Router::new();
        router.set_base_path("/portico");
        router
            .get("/archive[/:year[/:month]]", ok_handler("archive"))
            .unwrap()
            .name("archive")
            .unwrap();
        router
            .get("/users/:id", ok_handler("user"))
            .unwrap()
            .name("user.show")
            .unwrap();

        let params = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        assert_eq!(
            router.url("user.show", &params(&[("id", "9")])).unwrap(),
            "/portico/users/9"
        );
        assert_eq!(
            router.url("archive", &params(&[("year", "2024")])).unwrap(),
            "/portico/archive/2024"
        );
        assert!(matches!(
            router.url("missing", &BTreeMap::new()),
            Err(AppError::RouteNotFound(_))
        ));
        assert!(router.name("archive").is_err());

        let (request, _) = dispatch(&router, "GET", "/users/9");
        assert_eq!(request.route_name(), Some("user.show"));
    }

    #[test]
    fn test_custom_pattern_and_handlers() {
        let mut router = Router::new();
        router.pattern("code", "[A-Z]{3}").unwrap();
        router.get("/codes/:code", ok_handler("code")).unwrap();
        router.set_not_found_handler(|_req: &mut Request, mut res: Response| {
            res.json(json!({"success": false, "status_code": 404}));
            res.set_status_code(404);
            Ok(res)
        });
        router.set_method_not_allowed_handler(
            |_req: &mut Request, mut res: Response, allowed: &[Method]| {
                res.error(format!("use {}", allowed[0]), 405, None);
                Ok(res)
            },
        );

        let (_, found) = dispatch(&router, "GET", "/codes/ABC");
        assert_eq!(found.status_code(), 200);
        let (_, missing) = dispatch(&router, "GET", "/codes/abc");
        assert_eq!(missing.json_body().unwrap()["success"], json!(false));
        let (_, wrong) = dispatch(&router, "PUT", "/codes/ABC");
        assert_eq!(wrong.envelope_message().as_deref(), Some("use GET"));
    }

    #[test]
    fn test_head_is_not_routable() {
        let mut router = Router::new();
        router.get("/x", ok_handler("x")).unwrap();
        let (_, response) = dispatch(&router, "HEAD", "/x");
        assert_eq!(response.status_code(), 405);
        assert_eq!(response.header("Allow"), Some("GET"));
    }

    #[test]
    fn test_method_override_routes_as_overridden() {
        let mut router = Router::new();
        router.delete("/items/:id", ok_handler("deleted")).unwrap();
        let mut request = Request::builder("POST", "/items/3")
            .form("_method=DELETE")
            .build()
            .unwrap();
        let response = router.dispatch(&mut request, Response::new()).unwrap();
        assert_eq!(data(&response), json!("deleted"));
    }
}
