//! Outgoing response model.
//!
//! A [`Response`] is built up by middleware and handlers (status, headers,
//! cookies, content) and written once by [`Response::send`], which consumes
//! it. The envelope helpers (`success`, `error`, `not_found`, ...) produce the
//! uniform `{status_code, message, data?, errors?}` JSON body and set the HTTP
//! status to match; none of them send anything.

use crate::config::CorsConfig;
use crate::http::Method;
use crate::validation::ValidationErrors;
use log::trace;
use serde_json::{Map, Value, json};
use std::io::{self, Write};

const DEFAULT_CONTENT_TYPE: &str = "text/html";
const DEFAULT_CHARSET: &str = "UTF-8";
const SERVER_NAME: &str = concat!("portico/", env!("CARGO_PKG_VERSION"));

/// Body held by a response before rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Empty,
    Text(String),
    Json(Value),
}

/// A `Set-Cookie` entry.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lifetime in seconds; `None` makes a session cookie.
    pub max_age: Option<i64>,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: "Lax".to_string(),
        }
    }

    fn render(&self) -> String {
        let mut line = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(max_age) = self.max_age {
            line.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(domain) = &self.domain {
            line.push_str(&format!("; Domain={domain}"));
        }
        if self.secure {
            line.push_str("; Secure");
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        line.push_str(&format!("; SameSite={}", self.same_site));
        line
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    status_code: u16,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    content: Content,
    content_type: String,
    charset: String,
    expose_error_details: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status_code: 200,
            headers: Vec::new(),
            cookies: Vec::new(),
            content: Content::Empty,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
            expose_error_details: true,
        }
    }

    /// Whether `validation_error` includes the per-field messages.
    pub fn with_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn set_status_code(&mut self, status_code: u16) -> &mut Self {
        self.status_code = status_code;
        self
    }

    /// Set a header, replacing any existing value with the same
    /// (case-insensitive) name. `Content-Type` updates the content type and
    /// charset; `Content-Length` is always computed by `send`.
    pub fn set_header<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if self.absorb_entity_header(&name, &value) {
            return self;
        }
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Set a header only if it is not present yet.
    pub fn set_header_unless_present<N: Into<String>, V: Into<String>>(
        &mut self,
        name: N,
        value: V,
    ) -> &mut Self {
        let name = name.into();
        if is_entity_header(&name) {
            return self;
        }
        if self.header(&name).is_none() {
            self.headers.push((name, value.into()));
        }
        self
    }

    fn absorb_entity_header(&mut self, name: &str, value: &str) -> bool {
        if !is_entity_header(name) {
            return false;
        }
        if name.eq_ignore_ascii_case("content-type") {
            let mut parts = value.split(';');
            self.content_type = parts.next().unwrap_or_default().trim().to_string();
            if let Some(charset) = parts.find_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"').to_string())
            }) {
                self.charset = charset;
            }
        }
        true
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn set_content(&mut self, content: Content) -> &mut Self {
        self.content = content;
        self
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type<S: Into<String>>(&mut self, content_type: S) -> &mut Self {
        self.content_type = content_type.into();
        self
    }

    pub fn set_charset<S: Into<String>>(&mut self, charset: S) -> &mut Self {
        self.charset = charset.into();
        self
    }

    pub fn json(&mut self, value: Value) -> &mut Self {
        self.content_type = "application/json".to_string();
        self.content = Content::Json(value);
        self
    }

    pub fn text<S: Into<String>>(&mut self, text: S) -> &mut Self {
        self.content_type = "text/plain".to_string();
        self.content = Content::Text(text.into());
        self
    }

    pub fn html<S: Into<String>>(&mut self, html: S) -> &mut Self {
        self.content_type = "text/html".to_string();
        self.content = Content::Text(html.into());
        self
    }

    /// `{status_code:200, message, data?}`.
    pub fn success<M: Into<String>>(&mut self, data: Option<Value>, message: M) -> &mut Self {
        self.envelope(200, message.into(), data.map(|d| ("data", d)))
    }

    /// `{status_code, message, errors?}` with the HTTP status set to `status_code`.
    pub fn error<M: Into<String>>(
        &mut self,
        message: M,
        status_code: u16,
        errors: Option<Value>,
    ) -> &mut Self {
        self.envelope(status_code, message.into(), errors.map(|e| ("errors", e)))
    }

    pub fn created<M: Into<String>>(&mut self, data: Option<Value>, message: M) -> &mut Self {
        self.success(data, message)
    }

    pub fn not_found<M: Into<String>>(&mut self, message: M) -> &mut Self {
        self.error(message, 404, None)
    }

    pub fn unauthorized<M: Into<String>>(&mut self, message: M) -> &mut Self {
        self.error(message, 401, None)
    }

    pub fn forbidden<M: Into<String>>(&mut self, message: M) -> &mut Self {
        self.error(message, 403, None)
    }

    pub fn bad_request<M: Into<String>>(&mut self, message: M) -> &mut Self {
        self.error(message, 400, None)
    }

    pub fn method_not_allowed<M: Into<String>>(&mut self, message: M) -> &mut Self {
        self.error(message, 405, None)
    }

    pub fn server_error<M: Into<String>>(&mut self, message: M) -> &mut Self {
        self.error(message, 500, None)
    }

    /// 422 "Validation failed"; field messages are attached only when error
    /// details are exposed (any non-production environment).
    pub fn validation_error(&mut self, errors: &ValidationErrors) -> &mut Self {
        let details = self
            .expose_error_details
            .then(|| errors.to_value());
        self.error("Validation failed", 422, details)
    }

    pub fn no_content(&mut self) -> &mut Self {
        self.status_code = 204;
        self.content = Content::Empty;
        self
    }

    pub fn redirect<U: Into<String>>(&mut self, url: U, status_code: u16) -> &mut Self {
        self.status_code = status_code;
        self.content = Content::Empty;
        self.set_header("Location", url)
    }

    fn envelope(
        &mut self,
        status_code: u16,
        message: String,
        extra: Option<(&str, Value)>,
    ) -> &mut Self {
        let mut body = Map::new();
        body.insert("status_code".to_string(), json!(status_code));
        body.insert("message".to_string(), json!(message));
        if let Some((key, value)) = extra {
            body.insert(key.to_string(), value);
        }
        self.status_code = status_code;
        self.json(Value::Object(body))
    }

    pub fn set_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.retain(|existing| existing.name != cookie.name);
        self.cookies.push(cookie);
        self
    }

    pub fn delete_cookie(&mut self, name: &str, path: &str) -> &mut Self {
        let mut cookie = Cookie::new(name, "");
        cookie.path = path.to_string();
        cookie.max_age = Some(0);
        self.set_cookie(cookie)
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Apply the CORS policy for `origin`. Nothing is added when the origin is
    /// not allowed.
    pub fn enable_cors(&mut self, policy: &CorsConfig, origin: Option<&str>) -> &mut Self {
        let Some(allowed) = policy.allowed_origin(origin) else {
            trace!("Origin {origin:?} not allowed by CORS policy");
            return self;
        };
        self.set_header("Access-Control-Allow-Origin", allowed);
        if policy.allow_credentials {
            self.set_header("Access-Control-Allow-Credentials", "true");
        }
        self.set_header("Access-Control-Allow-Methods", policy.allowed_methods.join(", "));
        self.set_header("Access-Control-Allow-Headers", policy.allowed_headers.join(", "));
        self.set_header("Access-Control-Max-Age", policy.max_age.to_string())
    }

    /// Preflight answer: `Allow` lists `methods`, CORS headers follow the policy,
    /// no body.
    pub fn handle_preflight(
        &mut self,
        policy: &CorsConfig,
        origin: Option<&str>,
        methods: &[Method],
    ) -> &mut Self {
        let allow = methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        self.status_code = 200;
        self.content = Content::Empty;
        self.set_header("Allow", allow);
        self.enable_cors(policy, origin)
    }

    pub fn set_cache(&mut self, max_age: u64, public: bool) -> &mut Self {
        let visibility = if public { "public" } else { "private" };
        self.set_header(
            "Cache-Control",
            format!("{visibility}, max-age={max_age}, must-revalidate"),
        )
    }

    pub fn no_cache(&mut self) -> &mut Self {
        self.set_header("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0");
        self.set_header("Pragma", "no-cache");
        self.set_header("Expires", "0")
    }

    pub fn set_etag(&mut self, etag: &str, weak: bool) -> &mut Self {
        let value = if weak {
            format!("W/\"{etag}\"")
        } else {
            format!("\"{etag}\"")
        };
        self.set_header("ETag", value)
    }

    /// The JSON body, if the content is JSON.
    pub fn json_body(&self) -> Option<&Value> {
        match &self.content {
            Content::Json(value) => Some(value),
            _ => None,
        }
    }

    /// `status_code` field of the envelope, if the body is one.
    pub fn envelope_status(&self) -> Option<i64> {
        self.json_body()?.get("status_code")?.as_i64()
    }

    /// `message` field of the envelope, if present and non-empty.
    pub fn envelope_message(&self) -> Option<String> {
        self.json_body()?
            .get("message")?
            .as_str()
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    }

    /// Rendered body bytes.
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.content {
            Content::Empty => Vec::new(),
            Content::Text(text) => text.as_bytes().to_vec(),
            Content::Json(value) => value.to_string().into_bytes(),
        }
    }

    /// Write status line, headers and body. Consumes the response so it can
    /// only be sent once. Returns the number of body bytes written.
    pub fn send<W: Write>(self, out: &mut W) -> io::Result<u64> {
        let body = self.body_bytes();
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status_code,
            status_text(self.status_code)
        );
        head.push_str(&format!("Server: {SERVER_NAME}\r\n"));
        head.push_str("Connection: close\r\n");
        if self.status_code != 204 {
            head.push_str(&format!(
                "Content-Type: {}; charset={}\r\n",
                self.content_type, self.charset
            ));
        }
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        for cookie in &self.cookies {
            head.push_str(&format!("Set-Cookie: {}\r\n", cookie.render()));
        }
        head.push_str("\r\n");

        out.write_all(head.as_bytes())?;
        out.write_all(&body)?;
        out.flush()?;
        Ok(body.len() as u64)
    }
}

/// Headers `send` derives from the response itself.
fn is_entity_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-type") || name.eq_ignore_ascii_case("content-length")
}

/// Reason phrase for a status code.
pub fn status_text(status_code: u16) -> &'static str {
    match status_code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(response: Response) -> String {
        let mut out = Vec::new();
        response.send(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_success_envelope() {
        let mut response = Response::new();
        response.success(Some(json!({"id": 7})), "Done");
        assert_eq!(response.status_code(), 200);
        assert_eq!(
            response.json_body(),
            Some(&json!({"status_code": 200, "message": "Done", "data": {"id": 7}}))
        );
    }

    #[test]
    fn test_success_without_data_omits_key() {
        let mut response = Response::new();
        response.success(None, "Logout successful");
        assert!(response.json_body().unwrap().get("data").is_none());
    }

    #[test]
    fn test_error_sets_http_status() {
        let mut response = Response::new();
        response.unauthorized("Invalid token");
        assert_eq!(response.status_code(), 401);
        assert_eq!(response.envelope_status(), Some(401));
        assert_eq!(response.envelope_message().as_deref(), Some("Invalid token"));
    }

    #[test]
    fn test_validation_error_respects_detail_flag() {
        let mut errors = ValidationErrors::default();
        errors.add("title", "The title field is required.");

        let mut dev = Response::new();
        dev.validation_error(&errors);
        assert_eq!(dev.status_code(), 422);
        assert_eq!(
            dev.json_body().unwrap()["errors"]["title"][0],
            "The title field is required."
        );

        let mut prod = Response::new().with_error_details(false);
        prod.validation_error(&errors);
        assert_eq!(prod.envelope_message().as_deref(), Some("Validation failed"));
        assert!(prod.json_body().unwrap().get("errors").is_none());
    }

    #[test]
    fn test_headers_are_case_insensitive_and_last_write_wins() {
        let mut response = Response::new();
        response.set_header("X-Trace", "a");
        response.set_header("x-trace", "b");
        response.set_header_unless_present("X-TRACE", "c");
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.header("X-Trace"), Some("b"));
        response.remove_header("X-Trace");
        assert!(response.header("x-trace").is_none());
    }

    #[test]
    fn test_send_renders_status_headers_and_body() {
        let mut response = Response::new();
        response.error("Method not allowed: POST", 405, None);
        response.set_header("Allow", "GET");
        let raw = rendered(response);

        assert!(raw.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(raw.contains("Content-Type: application/json; charset=UTF-8\r\n"));
        assert!(raw.contains("Allow: GET\r\n"));
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            body,
            json!({"status_code": 405, "message": "Method not allowed: POST"})
        );
    }

    #[test]
    fn test_content_type_header_is_written_once() {
        let mut response = Response::new();
        response.set_content(Content::Text("<a/>".into()));
        response.set_header("Content-Type", "application/xml; charset=ISO-8859-1");
        response.set_header("content-length", "999");
        response.set_header_unless_present("Content-Type", "text/plain");
        assert_eq!(response.content_type(), "application/xml");
        assert!(response.header("Content-Type").is_none());

        let raw = rendered(response);
        let (head, _) = raw.split_once("\r\n\r\n").unwrap();
        let lines: Vec<&str> = head.lines().collect();
        let count = |name: &str| {
            lines
                .iter()
                .filter(|line| line.to_ascii_lowercase().starts_with(name))
                .count()
        };
        assert_eq!(count("content-type:"), 1);
        assert_eq!(count("content-length:"), 1);
        assert!(lines.contains(&"Content-Type: application/xml; charset=ISO-8859-1"));
        assert!(lines.contains(&"Content-Length: 4"));
    }

    #[test]
    fn test_default_content_type_is_html() {
        let mut response = Response::new();
        response.set_content(Content::Text("<p>hi</p>".into()));
        let raw = rendered(response);
        assert!(raw.contains("Content-Type: text/html; charset=UTF-8\r\n"));
        assert!(raw.contains("Content-Length: 9\r\n"));
    }

    #[test]
    fn test_cookies_render_as_separate_lines() {
        let mut response = Response::new();
        response.set_cookie(Cookie::new("session", "abc"));
        response.delete_cookie("legacy", "/");
        let raw = rendered(response);
        assert!(raw.contains("Set-Cookie: session=abc; Path=/; HttpOnly; SameSite=Lax\r\n"));
        assert!(raw.contains("Set-Cookie: legacy=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax\r\n"));
    }

    #[test]
    fn test_no_content_and_redirect() {
        let mut response = Response::new();
        response.no_content();
        assert_eq!(response.status_code(), 204);
        assert!(response.body_bytes().is_empty());

        let mut response = Response::new();
        response.redirect("/login", 302);
        assert_eq!(response.header("location"), Some("/login"));
    }

    #[test]
    fn test_preflight_lists_methods() {
        let policy = CorsConfig::default();
        let mut response = Response::new();
        response.handle_preflight(
            &policy,
            Some("https://app.example.com"),
            &[Method::Get, Method::Post, Method::Options],
        );
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("Allow"), Some("GET, POST, OPTIONS"));
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://app.example.com")
        );
        assert!(response.body_bytes().is_empty());
    }

    #[test]
    fn test_cache_helpers() {
        let mut response = Response::new();
        response.set_cache(60, true).set_etag("v1", true);
        assert_eq!(
            response.header("Cache-Control"),
            Some("public, max-age=60, must-revalidate")
        );
        assert_eq!(response.header("ETag"), Some("W/\"v1\""));
        response.no_cache();
        assert_eq!(response.header("Pragma"), Some("no-cache"));
    }
}
