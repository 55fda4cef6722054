// SPDX-License-Identifier: MIT

use portico::error::AppError;
use portico::http::Method;
use portico::middleware::Next;
use portico::request::Request;
use portico::response::Response;
use portico::router::Router;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn dispatch(router: &Router, method: &str, path: &str) -> Response {
    let mut request = Request::builder(method, path).build().unwrap();
    router.dispatch(&mut request, Response::new()).unwrap()
}

fn labelled(label: &'static str) -> impl Fn(&mut Request, Response) -> Result<Response, AppError> + Send + Sync + 'static {
    move |_: &mut Request, mut response: Response| -> Result<Response, AppError> {
        response.success(Some(json!(label)), "ok");
        Ok(response)
    }
}

// Scenario A
#[test]
fn test_health_route() {
    let mut router = Router::new();
    router
        .get(
            "/api/v1/health",
            |_: &mut Request, mut response: Response| -> Result<Response, AppError> {
                response.json(json!({"status": "ok", "timestamp": "2024-05-01 00:00:00"}));
                Ok(response)
            },
        )
        .unwrap();

    let response = dispatch(&router, "GET", "/api/v1/health");
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json_body().unwrap()["status"], "ok");
}

#[test]
fn test_dispatch_is_deterministic() {
    let mut router = Router::new();
    router.get("/items/:item", labelled("param")).unwrap();
    router.get("/items/new", labelled("literal")).unwrap();

    for _ in 0..10 {
        let response = dispatch(&router, "GET", "/items/new");
        assert_eq!(response.json_body().unwrap()["data"], "param");
    }
}

#[test]
fn test_options_allow_is_exact() {
    let mut router = Router::new();
    router.get("/things/:id", labelled("get")).unwrap();
    router.delete("/things/:id", labelled("delete")).unwrap();
    router.post("/things", labelled("post")).unwrap();

    let response = dispatch(&router, "OPTIONS", "/things/3");
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("Allow"), Some("GET, DELETE, OPTIONS"));

    let unknown = dispatch(&router, "OPTIONS", "/nothing");
    assert_eq!(unknown.status_code(), 404);
}

#[test]
fn test_method_not_allowed_versus_not_found() {
    let mut router = Router::new();
    router.get("/x", labelled("x")).unwrap();

    let wrong_method = dispatch(&router, "POST", "/x");
    assert_eq!(wrong_method.status_code(), 405);
    assert_eq!(wrong_method.header("Allow"), Some("GET"));

    let missing = dispatch(&router, "GET", "/y");
    assert_eq!(missing.status_code(), 404);
    assert_eq!(
        missing.envelope_message().as_deref(),
        Some("Route not found: /y")
    );
}

#[test]
fn test_short_circuit_skips_later_steps() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.register_middleware("deny", || {
        |_: &mut Request, mut response: Response, _: Next<'_>| -> Result<Response, AppError> {
            response.forbidden("Stop");
            Ok(response)
        }
    });
    let after = Arc::clone(&calls);
    router.register_middleware("count", move || {
        let after = Arc::clone(&after);
        move |request: &mut Request, response: Response, next: Next<'_>| -> Result<Response, AppError> {
            after.fetch_add(1, Ordering::SeqCst);
            next.run(request, response)
        }
    });
    let handler_calls = Arc::clone(&calls);
    router
        .post(
            "/guarded",
            move |_: &mut Request, response: Response| -> Result<Response, AppError> {
                handler_calls.fetch_add(1, Ordering::SeqCst);
                Ok(response)
            },
        )
        .unwrap()
        .with_middleware(&["deny", "count"]);

    let response = dispatch(&router, "POST", "/guarded");
    assert_eq!(response.status_code(), 403);
    assert_eq!(response.envelope_message().as_deref(), Some("Stop"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_global_group_route_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    for label in ["A", "B", "C"] {
        let order = Arc::clone(&order);
        router.register_middleware(label, move || {
            let order = Arc::clone(&order);
            move |request: &mut Request, response: Response, next: Next<'_>| -> Result<Response, AppError> {
                order.lock().unwrap().push(label);
                next.run(request, response)
            }
        });
    }
    router.add_global_middleware(&["A"]);
    let handler_order = Arc::clone(&order);
    router
        .group("/api", &["B"], |r| {
            r.get(
                "/run",
                move |_: &mut Request, response: Response| -> Result<Response, AppError> {
                    handler_order.lock().unwrap().push("handler");
                    Ok(response)
                },
            )?
            .with_middleware(&["C"]);
            Ok(())
        })
        .unwrap();

    dispatch(&router, "GET", "/api/run");
    assert_eq!(*order.lock().unwrap(), ["A", "B", "C", "handler"]);
}

#[test]
fn test_params_reach_handler() {
    let mut router = Router::new();
    router
        .get(
            "/users/:id[/:tab]",
            |request: &mut Request, mut response: Response| -> Result<Response, AppError> {
                response.success(
                    Some(json!({"id": request.param("id"), "tab": request.param("tab")})),
                    "ok",
                );
                Ok(response)
            },
        )
        .unwrap()
        .name("user.show")
        .unwrap();

    let full = dispatch(&router, "GET", "/users/7/posts");
    assert_eq!(full.json_body().unwrap()["data"], json!({"id": "7", "tab": "posts"}));
    let short = dispatch(&router, "GET", "/users/7");
    assert_eq!(short.json_body().unwrap()["data"], json!({"id": "7", "tab": null}));

    let mut params = BTreeMap::new();
    params.insert("id".to_string(), "9".to_string());
    assert_eq!(router.url("user.show", &params).unwrap(), "/users/9");
    assert!(matches!(
        router.url("missing", &params),
        Err(AppError::RouteNotFound(_))
    ));
}

#[test]
fn test_base_path_is_stripped() {
    let mut router = Router::new();
    router.set_base_path("/portico");
    router.get("/ping", labelled("pong")).unwrap();

    assert_eq!(dispatch(&router, "GET", "/portico/ping").status_code(), 200);
    assert_eq!(dispatch(&router, "GET", "/porticoping").status_code(), 404);
    assert_eq!(router.allowed_methods(&router.normalize_path("/portico/ping")), [Method::Get]);
}
