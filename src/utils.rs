//! Small helpers shared by the request model, controllers and middleware.

use chrono::Local;
use rand::RngCore;
use serde_json::{Map, Value};

/// Timestamp format used for every persisted datetime column.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Percent-decode a form or query component, treating `+` as a space.
pub fn url_decode(input: &str) -> String {
    percent_decode(input, true)
}

/// Percent-decode a path. `+` is kept literally.
pub fn decode_path(input: &str) -> String {
    percent_decode(input, false)
}

fn percent_decode(input: &str, plus_as_space: bool) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        // Invalid escape, keep as-is
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

/// Parse an `application/x-www-form-urlencoded` string (or a query string).
///
/// `name[]=v` collects into a list and `name[key]=v` into a one level map.
/// Repeated plain keys keep the last value.
pub fn parse_urlencoded(input: &str) -> Map<String, Value> {
    let mut data = Map::new();

    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = url_decode(raw_key);
        let value = Value::String(url_decode(raw_value));
        if key.is_empty() {
            continue;
        }

        insert_form_field(&mut data, key, value);
    }

    data
}

/// Insert one decoded form field, honouring the `name[]` and `name[key]`
/// shapes.
pub fn insert_form_field(data: &mut Map<String, Value>, key: String, value: Value) {
    if let Some(base) = key.strip_suffix("[]")
        && !base.is_empty()
    {
        let entry = data
            .entry(base.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            items.push(value);
        }
        return;
    }

    if let Some(open) = key.find('[')
        && open > 0
        && key.ends_with(']')
    {
        let base = &key[..open];
        let sub = &key[open + 1..key.len() - 1];
        let entry = data
            .entry(base.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(sub.to_string(), value);
        }
        return;
    }

    data.insert(key, value);
}

/// Split a request target into its path and optional query string.
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Scalar view of a JSON value the way form fields are compared.
///
/// Strings are returned as is, numbers and booleans are rendered, `null`
/// yields `None`, and compound values are serialized.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// `null` and the empty string count as "not supplied".
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Lenient integer view: numbers, numeric strings and booleans.
pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Random lowercase hex string of `length` characters.
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length.div_ceil(2)];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    token.truncate(length);
    token
}

/// 28 character uppercase record code: a second-resolution timestamp followed
/// by random hex.
pub fn generate_db_code() -> String {
    let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let random = generate_token(28 - stamp.len());
    format!("{stamp}{random}").to_uppercase()
}

/// Current local time in `DATETIME_FORMAT`.
pub fn now_timestamp() -> String {
    Local::now().format(DATETIME_FORMAT).to_string()
}
