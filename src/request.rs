//! Normalized request model.
//!
//! A [`Request`] is built once from a [`RawRequest`]: the method override is
//! applied, the query string and cookies are decoded and the body is parsed
//! exactly once according to `Content-Type`:
//!
//! * `application/json` - a JSON object, or an empty map when the body is not
//!   a valid object
//! * `application/x-www-form-urlencoded` - form fields
//! * `multipart/form-data` - text fields into the body data, file parts into
//!   [`Request::files`]
//! * anything else - the raw body read as urlencoded
//!
//! PUT, PATCH and DELETE requests whose body yielded nothing fall back to the
//! raw body read as urlencoded as well.
//!
//! Input lookups across sources follow path params, then query, then body.

use crate::error::AppError;
use crate::http::{Method, RawRequest};
use crate::multipart::{MultipartConfig, MultipartParser};
use crate::utils::{
    decode_path, insert_form_field, is_blank, parse_urlencoded, split_target, url_decode,
    value_to_i64, value_to_string,
};
use crate::validation::{self, Rules, ValidationErrors};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};

/// Proxy headers consulted for the client address, most specific first.
const CLIENT_IP_HEADERS: [&str; 6] = [
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
    "forwarded",
];

const UNKNOWN_CLIENT_IP: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortParams {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    transport_method: Method,
    uri: String,
    path: String,
    params: BTreeMap<String, String>,
    query: Map<String, Value>,
    data: Map<String, Value>,
    files: HashMap<String, UploadedFile>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    raw_body: Vec<u8>,
    peer: Option<SocketAddr>,
    accepts: Vec<String>,
    route_name: Option<String>,
    principal: OnceCell<Value>,
    connection: Option<String>,
}

impl Request {
    /// Normalize a parsed wire request.
    pub fn from_raw(raw: RawRequest, peer: Option<SocketAddr>) -> Result<Self, AppError> {
        let transport_method: Method = raw.method.parse()?;
        let (path, query) = split_target(&raw.target);
        let path = decode_path(if path.is_empty() { "/" } else { path });
        let query = query.map(parse_urlencoded).unwrap_or_default();

        let content_type = raw
            .headers
            .get("content-type")
            .map(|ct| ct.to_lowercase())
            .unwrap_or_default();
        let (mut data, files) = parse_body(&content_type, &raw.headers, &raw.body)?;

        if matches!(
            transport_method,
            Method::Put | Method::Patch | Method::Delete
        ) && data.is_empty()
        {
            data = parse_urlencoded(&String::from_utf8_lossy(&raw.body));
        }

        let method = match transport_method {
            Method::Post => override_method(&data, &raw.headers).unwrap_or(Method::Post),
            other => other,
        };

        let cookies = raw
            .headers
            .get("cookie")
            .map(|header| parse_cookies(header))
            .unwrap_or_default();
        let accepts = raw
            .headers
            .get("accept")
            .map(|header| parse_accept(header))
            .unwrap_or_else(|| vec!["*/*".to_string()]);

        debug!(
            "Request {} {} (data fields: {}, files: {})",
            method,
            path,
            data.len(),
            files.len()
        );

        Ok(Self {
            method,
            transport_method,
            uri: raw.target,
            path,
            params: BTreeMap::new(),
            query,
            data,
            files,
            headers: raw.headers,
            cookies,
            raw_body: raw.body,
            peer,
            accepts,
            route_name: None,
            principal: OnceCell::new(),
            connection: None,
        })
    }

    pub fn builder<T: Into<String>>(method: &str, target: T) -> RequestBuilder {
        RequestBuilder::new(method, target)
    }

    /// Effective method, after any POST override.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Method as sent on the wire.
    pub fn transport_method(&self) -> Method {
        self.transport_method
    }

    pub fn is_method(&self, method: &str) -> bool {
        method.parse::<Method>().is_ok_and(|m| m == self.method)
    }

    /// Request target as received, query string included.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Percent-decoded path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn set_params(&mut self, params: BTreeMap<String, String>) {
        self.params = params;
    }

    pub fn query(&self, name: &str) -> Option<&Value> {
        self.query.get(name).filter(|v| !v.is_null())
    }

    pub fn query_params(&self) -> &Map<String, Value> {
        &self.query
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.query(name).is_some()
    }

    /// Body field, treating `null` and `""` as absent.
    pub fn get_data(&self, name: &str) -> Option<&Value> {
        self.data.get(name).filter(|v| !is_blank(v))
    }

    pub fn data_str(&self, name: &str) -> Option<String> {
        self.get_data(name).and_then(value_to_string)
    }

    pub fn data_i64(&self, name: &str) -> Option<i64> {
        self.get_data(name).and_then(value_to_i64)
    }

    /// Every body field, blanks included.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn set_data<K: Into<String>>(&mut self, name: K, value: Value) {
        self.data.insert(name.into(), value);
    }

    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    pub fn files(&self) -> &HashMap<String, UploadedFile> {
        &self.files
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }

    pub fn has_content_type(&self, content_type: &str) -> bool {
        self.content_type()
            .to_lowercase()
            .contains(&content_type.to_lowercase())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    /// First non-null value among path params, query and body.
    pub fn input(&self, name: &str) -> Option<Value> {
        if let Some(param) = self.params.get(name) {
            return Some(Value::String(param.clone()));
        }
        self.query(name)
            .or_else(|| self.data.get(name).filter(|v| !v.is_null()))
            .cloned()
    }

    /// Body, query and path params merged; path params win, then query.
    pub fn all(&self) -> Map<String, Value> {
        let mut merged = self.data.clone();
        merged.extend(self.query.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.extend(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone()))),
        );
        merged
    }

    pub fn only(&self, keys: &[&str]) -> Map<String, Value> {
        let all = self.all();
        keys.iter()
            .filter_map(|key| {
                all.get(*key)
                    .filter(|v| !v.is_null())
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect()
    }

    pub fn except(&self, keys: &[&str]) -> Map<String, Value> {
        let mut all = self.all();
        for key in keys {
            all.remove(*key);
        }
        all
    }

    pub fn has(&self, name: &str) -> bool {
        self.input(name).is_some()
    }

    pub fn has_all(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.has(name))
    }

    pub fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.has(name))
    }

    /// Validate the merged input.
    pub fn validate(&self, rules: &Rules) -> Result<(), ValidationErrors> {
        validation::validate(&self.all(), rules)
    }

    /// Body `accessToken`, then `Authorization: Bearer`.
    pub fn bearer_token(&self) -> Option<String> {
        if let Some(token) = self.data_str("accessToken") {
            return Some(token);
        }
        let header = self.header("authorization")?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))?
            .trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    /// Decoded `Authorization: Basic` credentials.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let encoded = self.header("authorization")?.strip_prefix("Basic ")?;
        let decoded = BASE64.decode(encoded.trim()).ok()?;
        let credentials = String::from_utf8(decoded).ok()?;
        let (username, password) = credentials.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }

    /// Accepted media types, highest quality first.
    pub fn accept(&self) -> &[String] {
        &self.accepts
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        if self.accepts.iter().any(|a| a == "*/*" || a == content_type) {
            return true;
        }
        let major = content_type.split('/').next().unwrap_or_default();
        self.accepts.iter().any(|a| *a == format!("{major}/*"))
    }

    pub fn accepts_html(&self) -> bool {
        self.accepts("text/html")
    }

    /// JSON is accepted and listed ahead of HTML, if HTML is listed at all.
    pub fn wants_json(&self) -> bool {
        if !self.accepts("application/json") {
            return false;
        }
        if !self.accepts("text/html") {
            return true;
        }
        let position = |ty: &str| self.accepts.iter().position(|a| a == ty);
        match (position("application/json"), position("text/html")) {
            (Some(json), Some(html)) => json < html,
            _ => false,
        }
    }

    pub fn is_json(&self) -> bool {
        self.has_content_type("application/json")
    }

    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with") == Some("XMLHttpRequest")
    }

    pub fn is_secure(&self) -> bool {
        if self
            .header("x-forwarded-proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
        {
            return true;
        }
        self.header("host").is_some_and(|host| host.ends_with(":443"))
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    /// First valid address from the proxy headers, then the peer address.
    pub fn client_ip(&self) -> String {
        for name in CLIENT_IP_HEADERS {
            let Some(value) = self.header(name) else {
                continue;
            };
            let first = value.split(',').next().unwrap_or_default().trim();
            let candidate = first
                .strip_prefix("for=")
                .unwrap_or(first)
                .trim_matches('"');
            if let Ok(ip) = candidate.parse::<IpAddr>() {
                return ip.to_string();
            }
        }
        self.peer
            .map(|peer| peer.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.is_secure() { "https" } else { "http" };
        let host = self.header("host").unwrap_or("localhost");
        format!("{scheme}://{host}")
    }

    pub fn full_url(&self) -> String {
        format!("{}{}", self.base_url(), self.uri)
    }

    /// Whether the Referer host is `domain` or one of its subdomains.
    pub fn is_from_domain(&self, domain: &str) -> bool {
        let Some(referer) = self.header("referer") else {
            return false;
        };
        let after_scheme = referer.split_once("://").map_or(referer, |(_, rest)| rest);
        let authority = after_scheme.split(['/', '?', '#']).next().unwrap_or_default();
        let host = authority
            .rsplit_once('@')
            .map_or(authority, |(_, host)| host)
            .split(':')
            .next()
            .unwrap_or_default();
        host.eq_ignore_ascii_case(domain)
            || host
                .to_lowercase()
                .ends_with(&format!(".{}", domain.to_lowercase()))
    }

    /// `page` and `limit` from the query; page at least 1, limit within
    /// `1..=max_limit`.
    pub fn pagination(&self, default_page: u64, default_limit: u64, max_limit: u64) -> Pagination {
        let read = |name: &str, default: u64| {
            self.query(name)
                .and_then(value_to_i64)
                .map_or(default as i64, |v| v)
        };
        let page = read("page", default_page).max(1) as u64;
        let limit = (read("limit", default_limit).max(1) as u64).min(max_limit.max(1));
        Pagination {
            page,
            limit,
            offset: (page - 1).saturating_mul(limit),
        }
    }

    /// `sort` and `direction` from the query. A field outside `allowed` (when
    /// non-empty) or an unknown direction falls back to the defaults.
    pub fn sort_params(
        &self,
        default_field: &str,
        default_direction: SortDirection,
        allowed: &[&str],
    ) -> SortParams {
        let field = self
            .query("sort")
            .and_then(value_to_string)
            .filter(|f| allowed.is_empty() || allowed.contains(&f.as_str()))
            .unwrap_or_else(|| default_field.to_string());
        let direction = match self
            .query("direction")
            .and_then(value_to_string)
            .map(|d| d.to_lowercase())
            .as_deref()
        {
            Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            _ => default_direction,
        };
        SortParams { field, direction }
    }

    /// Query parameters other than paging and sorting, limited to `allowed`
    /// when it is non-empty.
    pub fn filter_params(&self, allowed: &[&str]) -> Map<String, Value> {
        self.query
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "page" | "limit" | "sort" | "direction"))
            .filter(|(key, _)| allowed.is_empty() || allowed.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn search_query(&self, name: &str) -> Option<String> {
        self.query(name)
            .and_then(value_to_string)
            .filter(|q| !q.is_empty())
    }

    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    pub fn set_route_name(&mut self, name: Option<String>) {
        self.route_name = name;
    }

    /// Identity attached by an authentication middleware.
    pub fn principal(&self) -> Option<&Value> {
        self.principal.get()
    }

    /// Attach the authenticated identity. The slot is written once per request.
    pub fn set_principal(&self, principal: Value) -> Result<(), AppError> {
        self.principal
            .set(principal)
            .map_err(|_| AppError::internal("principal already set for this request"))
    }

    /// Logical persistence connection selected for this request.
    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn select_connection<S: Into<String>>(&mut self, name: S) {
        let name = name.into();
        debug!("Request connection set to {name}");
        self.connection = Some(name);
    }
}

type ParsedBody = (Map<String, Value>, HashMap<String, UploadedFile>);

fn parse_body(
    content_type: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Result<ParsedBody, AppError> {
    if content_type.contains("application/json") {
        let data = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                if !body.is_empty() {
                    debug!("JSON body is not an object, treating as empty");
                }
                Map::new()
            }
        };
        return Ok((data, HashMap::new()));
    }

    if content_type.contains("multipart/form-data") {
        let header = headers.get("content-type").map(String::as_str).unwrap_or_default();
        return parse_multipart(header, body);
    }

    // Form bodies and every other content type are read as urlencoded
    Ok((
        parse_urlencoded(&String::from_utf8_lossy(body)),
        HashMap::new(),
    ))
}

fn parse_multipart(content_type: &str, body: &[u8]) -> Result<ParsedBody, AppError> {
    let mut data = Map::new();
    let mut files = HashMap::new();
    if body.is_empty() {
        return Ok((data, files));
    }

    let boundary = MultipartParser::extract_boundary_from_content_type(content_type)?;
    let parser = MultipartParser::new(&boundary, MultipartConfig::default())?;
    for part in parser.parse(body)? {
        let field = part.field_name().to_string();
        match part.filename() {
            Some(filename) => {
                let file = UploadedFile {
                    filename: filename.to_string(),
                    content_type: part.headers.content_type.clone(),
                    bytes: part.data,
                };
                files.insert(field, file);
            }
            None => {
                let text = part.text();
                insert_form_field(&mut data, field, Value::String(text));
            }
        }
    }
    Ok((data, files))
}

fn override_method(data: &Map<String, Value>, headers: &HashMap<String, String>) -> Option<Method> {
    let requested = data
        .get("_method")
        .and_then(value_to_string)
        .or_else(|| headers.get("x-http-method-override").cloned())?;
    match requested.parse::<Method>() {
        Ok(method) => Some(method),
        Err(_) => {
            warn!("Ignoring unsupported method override: {requested}");
            None
        }
    }
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), url_decode(value.trim())))
        })
        .collect()
}

/// Media types from an `Accept` header ordered by descending quality.
fn parse_accept(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = Vec::new();
    for item in header.split(',') {
        let mut pieces = item.split(';');
        let media = pieces.next().unwrap_or_default().trim();
        if media.is_empty() {
            continue;
        }
        let quality = pieces
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.parse::<f32>().ok())
            .unwrap_or(1.0);
        match weighted.iter_mut().find(|(existing, _)| existing == media) {
            Some(entry) => entry.1 = quality,
            None => weighted.push((media.to_string(), quality)),
        }
    }
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
    weighted.into_iter().map(|(media, _)| media).collect()
}

/// Builds requests without a socket, mainly for tests and embedding.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    raw: RawRequest,
    peer: Option<SocketAddr>,
}

impl RequestBuilder {
    pub fn new<T: Into<String>>(method: &str, target: T) -> Self {
        Self {
            raw: RawRequest {
                method: method.to_ascii_uppercase(),
                target: target.into(),
                headers: HashMap::new(),
                body: Vec::new(),
            },
            peer: None,
        }
    }

    pub fn header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.raw
            .headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.raw.body = body.into();
        self
    }

    pub fn json(self, value: &Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    pub fn form(self, encoded: &str) -> Self {
        self.header("content-type", "application/x-www-form-urlencoded")
            .body(encoded)
    }

    pub fn peer(mut self, addr: SocketAddr) -> Self {
        self.peer = Some(addr);
        self
    }

    pub fn build(self) -> Result<Request, AppError> {
        Request::from_raw(self.raw, self.peer)
    }
}
