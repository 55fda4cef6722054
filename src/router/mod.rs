//! Route table and dispatcher.
//!
//! Routes are kept per method in registration order and the first structural
//! match wins. Groups push a prefix and a middleware list for the duration of
//! a registration closure; nested groups concatenate with the enclosing one.
//! The chain for a matched route is the global middleware followed by the
//! route's own list (group-inherited first, then per-route additions).

mod dispatch;
pub mod pattern;

pub use pattern::{PathPattern, PatternRegistry};

use crate::config::CorsConfig;
use crate::error::AppError;
use crate::http::Method;
use crate::middleware::{Middleware, MiddlewareRegistry};
use crate::request::Request;
use crate::response::Response;
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Route handler: reads the request and returns the response to send.
pub type Handler = Arc<dyn Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync>;

/// Handler for paths that match under other methods only.
pub type MethodNotAllowedHandler =
    Arc<dyn Fn(&mut Request, Response, &[Method]) -> Result<Response, AppError> + Send + Sync>;

/// Bind a controller method to a shared controller instance.
pub fn action<C>(
    controller: &Arc<C>,
    method: fn(&C, &mut Request, Response) -> Result<Response, AppError>,
) -> impl Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    let controller = Arc::clone(controller);
    move |request, response| method(&controller, request, response)
}

pub struct Route {
    method: Method,
    pattern: PathPattern,
    handler: Handler,
    middleware: Vec<String>,
    name: Option<String>,
}

impl Route {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn template(&self) -> &str {
        self.pattern.template()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn middleware(&self) -> &[String] {
        &self.middleware
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template())
            .field("middleware", &self.middleware)
            .field("name", &self.name)
            .finish()
    }
}

struct Group {
    prefix: String,
    middleware: Vec<String>,
}

pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
    last_added: Vec<(Method, usize)>,
    named: HashMap<String, String>,
    groups: Vec<Group>,
    patterns: PatternRegistry,
    base_path: String,
    global_middleware: Vec<String>,
    middleware: MiddlewareRegistry,
    cors: CorsConfig,
    not_found: Handler,
    method_not_allowed: MethodNotAllowedHandler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes().collect::<Vec<_>>())
            .field("base_path", &self.base_path)
            .field("global_middleware", &self.global_middleware)
            .field("middleware", &self.middleware)
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            last_added: Vec::new(),
            named: HashMap::new(),
            groups: Vec::new(),
            patterns: PatternRegistry::default(),
            base_path: String::new(),
            global_middleware: Vec::new(),
            middleware: MiddlewareRegistry::new(),
            cors: CorsConfig::default(),
            not_found: Arc::new(|request: &mut Request, mut response: Response| -> Result<Response, AppError> {
                response.not_found(format!("Route not found: {}", request.path()));
                Ok(response)
            }),
            method_not_allowed: Arc::new(
                |request: &mut Request,
                 mut response: Response,
                 allowed: &[Method]|
                 -> Result<Response, AppError> {
                    response.method_not_allowed(format!("Method not allowed: {}", request.method()));
                    response.set_header("Allow", join_methods(allowed));
                    Ok(response)
                },
            ),
        }
    }

    /// Prefix stripped from request paths before matching and prepended by
    /// [`Router::url`].
    pub fn set_base_path(&mut self, base_path: &str) -> &mut Self {
        let trimmed = base_path.trim().trim_matches('/');
        self.base_path = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn set_cors(&mut self, cors: CorsConfig) -> &mut Self {
        self.cors = cors;
        self
    }

    pub fn cors(&self) -> &CorsConfig {
        &self.cors
    }

    /// Register a named middleware factory.
    pub fn register_middleware<N, F, M>(&mut self, name: N, factory: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn() -> M + Send + Sync + 'static,
        M: Middleware + 'static,
    {
        self.middleware.register(name, factory);
        self
    }

    pub fn middleware_registry(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    pub fn middleware_registry_mut(&mut self) -> &mut MiddlewareRegistry {
        &mut self.middleware
    }

    /// Append names to the middleware that runs before every route.
    pub fn add_global_middleware<S: AsRef<str>>(&mut self, names: &[S]) -> &mut Self {
        self.global_middleware
            .extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    pub fn global_middleware(&self) -> &[String] {
        &self.global_middleware
    }

    /// Register a custom named parameter pattern for routes added afterwards.
    pub fn pattern(&mut self, name: &str, regex: &str) -> Result<&mut Self, AppError> {
        self.patterns.register(name, regex)?;
        Ok(self)
    }

    pub fn set_not_found_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.not_found = Arc::new(handler);
        self
    }

    pub fn set_method_not_allowed_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: Fn(&mut Request, Response, &[Method]) -> Result<Response, AppError>
            + Send
            + Sync
            + 'static,
    {
        self.method_not_allowed = Arc::new(handler);
        self
    }

    /// Append a route for `method` under the current group.
    pub fn add_route<H>(&mut self, method: Method, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.push_routes(&[method], template, Arc::new(handler))
    }

    /// Append one route per method sharing a single handler.
    pub fn map<H>(&mut self, methods: &[Method], template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.push_routes(methods, template, Arc::new(handler))
    }

    pub fn get<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.add_route(Method::Get, template, handler)
    }

    pub fn post<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.add_route(Method::Post, template, handler)
    }

    pub fn put<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.add_route(Method::Put, template, handler)
    }

    pub fn patch<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.add_route(Method::Patch, template, handler)
    }

    pub fn delete<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.add_route(Method::Delete, template, handler)
    }

    pub fn options<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.add_route(Method::Options, template, handler)
    }

    /// Register under every routable method.
    pub fn any<H>(&mut self, template: &str, handler: H) -> Result<&mut Self, AppError>
    where
        H: Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static,
    {
        self.map(&Method::ROUTABLE, template, handler)
    }

    /// Register routes inside `body` with `prefix` and `middleware` inherited.
    pub fn group<F, S>(&mut self, prefix: &str, middleware: &[S], body: F) -> Result<&mut Self, AppError>
    where
        F: FnOnce(&mut Router) -> Result<(), AppError>,
        S: AsRef<str>,
    {
        let trimmed = prefix.trim_matches('/');
        self.groups.push(Group {
            prefix: if trimmed.is_empty() {
                String::new()
            } else {
                format!("/{trimmed}")
            },
            middleware: middleware.iter().map(|m| m.as_ref().to_string()).collect(),
        });
        trace!("Entering route group {prefix:?} (depth {})", self.groups.len());
        let result = body(self);
        self.groups.pop();
        result?;
        Ok(self)
    }

    /// Append middleware to the most recently registered route(s).
    pub fn with_middleware<S: AsRef<str>>(&mut self, names: &[S]) -> &mut Self {
        for (method, index) in self.last_added.clone() {
            if let Some(route) = self
                .routes
                .get_mut(&method)
                .and_then(|routes| routes.get_mut(index))
            {
                route
                    .middleware
                    .extend(names.iter().map(|n| n.as_ref().to_string()));
            }
        }
        self
    }

    /// Name the most recently registered route for reverse lookup.
    pub fn name(&mut self, label: &str) -> Result<&mut Self, AppError> {
        if self.named.contains_key(label) {
            return Err(AppError::configuration(format!(
                "Route name already in use: {label}"
            )));
        }
        let mut template = None;
        for (method, index) in self.last_added.clone() {
            if let Some(route) = self
                .routes
                .get_mut(&method)
                .and_then(|routes| routes.get_mut(index))
            {
                route.name = Some(label.to_string());
                template = Some(route.template().to_string());
            }
        }
        let template = template.ok_or_else(|| {
            AppError::configuration(format!("No route to name: {label}"))
        })?;
        self.named.insert(label.to_string(), template);
        Ok(self)
    }

    /// Build the path of a named route, base path included.
    pub fn url(&self, name: &str, params: &BTreeMap<String, String>) -> Result<String, AppError> {
        let template = self
            .named
            .get(name)
            .ok_or_else(|| AppError::RouteNotFound(name.to_string()))?;
        Ok(format!(
            "{}{}",
            self.base_path,
            pattern::build_path(template, params)
        ))
    }

    /// Every route, grouped by method in `Allow` order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete, Method::Options, Method::Head]
            .into_iter()
            .filter_map(|method| self.routes.get(&method))
            .flatten()
    }

    /// Check that every referenced middleware name resolves.
    pub fn verify(&self) -> Result<(), AppError> {
        for name in &self.global_middleware {
            if !self.middleware.contains(name) {
                return Err(AppError::configuration(format!(
                    "Unknown global middleware: {name}"
                )));
            }
        }
        for route in self.routes() {
            if let Some(name) = route
                .middleware
                .iter()
                .find(|name| !self.middleware.contains(name))
            {
                return Err(AppError::configuration(format!(
                    "Unknown middleware {name} on {} {}",
                    route.method,
                    route.template()
                )));
            }
        }
        Ok(())
    }

    fn push_routes(
        &mut self,
        methods: &[Method],
        template: &str,
        handler: Handler,
    ) -> Result<&mut Self, AppError> {
        let prefix: String = self.groups.iter().map(|g| g.prefix.as_str()).collect();
        let full = canonical_path(&format!("{prefix}/{}", template.trim_matches('/')));
        let pattern = PathPattern::compile(&full, &self.patterns)?;
        let middleware: Vec<String> = self
            .groups
            .iter()
            .flat_map(|g| g.middleware.iter().cloned())
            .collect();

        self.last_added.clear();
        for &method in methods {
            let routes = self.routes.entry(method).or_default();
            routes.push(Route {
                method,
                pattern: pattern.clone(),
                handler: Arc::clone(&handler),
                middleware: middleware.clone(),
                name: None,
            });
            self.last_added.push((method, routes.len() - 1));
            debug!("Registered route {method} {full}");
        }
        Ok(self)
    }
}

/// Leading slash, no trailing slash, no empty segments; the root is `/`.
pub(crate) fn canonical_path(path: &str) -> String {
    let mut canonical = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() {
        canonical.push('/');
    }
    canonical
}

pub(crate) fn join_methods(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
