//! Field-rule validation over request data.
//!
//! Rules are checked per field in declaration order. A field that is absent
//! (or `null`) and not `Required` is skipped entirely; every other rule
//! ignores blank values, so only `Required` reports them.

use crate::utils::{is_blank, value_to_string};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+\S*$").expect("valid url regex")
});
static ALPHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{M}]+$").expect("valid alpha regex"));
static ALPHA_NUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{M}\p{N}]+$").expect("valid alpha_num regex"));
static ALPHA_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{M}\p{N}_-]+$").expect("valid alpha_dash regex"));

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Required,
    Email,
    Url,
    Numeric,
    Integer,
    Float,
    Boolean,
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
    Date,
    /// Minimum length for strings, minimum value for numbers.
    Min(f64),
    Max(f64),
    Between(f64, f64),
    /// Character length of the scalar rendering, inclusive bounds.
    Length(usize, usize),
    In(Vec<String>),
    NotIn(Vec<String>),
    Regex(String),
    Same(String),
    Different(String),
    Alpha,
    AlphaNum,
    AlphaDash,
    /// A rule name that could not be resolved; always fails.
    Unknown(String),
}

impl Rule {
    /// Parse the compact `name:arg1,arg2` notation, e.g. `length:2,20`.
    pub fn from_notation(notation: &str) -> Rule {
        let (name, args) = notation.split_once(':').unwrap_or((notation, ""));
        let list = || -> Vec<String> {
            args.split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect()
        };
        let number = |s: &str| s.trim().parse::<f64>().ok();
        let pair = || {
            let (a, b) = args.split_once(',')?;
            Some((number(a)?, number(b)?))
        };

        let rule = match name.trim() {
            "required" => Some(Rule::Required),
            "email" => Some(Rule::Email),
            "url" => Some(Rule::Url),
            "numeric" => Some(Rule::Numeric),
            "integer" => Some(Rule::Integer),
            "float" => Some(Rule::Float),
            "boolean" => Some(Rule::Boolean),
            "date" => Some(Rule::Date),
            "min" => number(args).map(Rule::Min),
            "max" => number(args).map(Rule::Max),
            "between" => pair().map(|(a, b)| Rule::Between(a, b)),
            "length" => pair().map(|(a, b)| Rule::Length(a as usize, b as usize)),
            "in" => Some(Rule::In(list())),
            "not_in" => Some(Rule::NotIn(list())),
            "regex" => Some(Rule::Regex(args.to_string())),
            "same" => Some(Rule::Same(args.trim().to_string())),
            "different" => Some(Rule::Different(args.trim().to_string())),
            "alpha" => Some(Rule::Alpha),
            "alpha_num" => Some(Rule::AlphaNum),
            "alpha_dash" => Some(Rule::AlphaDash),
            _ => None,
        };
        rule.unwrap_or_else(|| Rule::Unknown(notation.to_string()))
    }
}

/// Ordered `field -> rules` list.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    fields: Vec<(String, Vec<Rule>)>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<F, I>(mut self, name: F, rules: I) -> Self
    where
        F: Into<String>,
        I: IntoIterator<Item = Rule>,
    {
        self.fields
            .push((name.into(), rules.into_iter().collect()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Rule])> {
        self.fields
            .iter()
            .map(|(name, rules)| (name.as_str(), rules.as_slice()))
    }
}

/// `field -> [messages]`, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add<F: Into<String>, M: Into<String>>(&mut self, field: F, message: M) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Validate `data` against `rules`.
pub fn validate(data: &Map<String, Value>, rules: &Rules) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    for (field, field_rules) in rules.iter() {
        let value = data.get(field).unwrap_or(&Value::Null);
        if value.is_null() && !field_rules.contains(&Rule::Required) {
            continue;
        }
        for rule in field_rules {
            if let Some(message) = check(field, value, rule, data) {
                errors.add(field, message);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check(field: &str, value: &Value, rule: &Rule, data: &Map<String, Value>) -> Option<String> {
    let present = !is_blank(value);
    let text = value_to_string(value).unwrap_or_default();

    let failed = match rule {
        Rule::Required => !present,
        Rule::Same(other) => value != data.get(other).unwrap_or(&Value::Null),
        Rule::Different(other) => value == data.get(other).unwrap_or(&Value::Null),
        Rule::Unknown(_) => true,
        _ if !present => false,
        Rule::Email => !EMAIL.is_match(&text),
        Rule::Url => !URL.is_match(&text),
        Rule::Numeric => as_number(value).is_none(),
        Rule::Integer => !is_integer(value),
        Rule::Float => as_number(value).is_none(),
        Rule::Boolean => !is_boolean(value),
        Rule::Date => !is_date(&text),
        Rule::Min(min) => measure(value).is_some_and(|m| m < *min),
        Rule::Max(max) => measure(value).is_some_and(|m| m > *max),
        Rule::Between(min, max) => measure(value).is_some_and(|m| m < *min || m > *max),
        Rule::Length(min, max) => {
            let length = text.chars().count();
            length < *min || length > *max
        }
        Rule::In(allowed) => !matches!(value, Value::String(s) if allowed.contains(s)),
        Rule::NotIn(denied) => matches!(value, Value::String(s) if denied.contains(s)),
        Rule::Regex(pattern) => Regex::new(pattern).map_or(true, |re| !re.is_match(&text)),
        Rule::Alpha => !ALPHA.is_match(&text),
        Rule::AlphaNum => !ALPHA_NUM.is_match(&text),
        Rule::AlphaDash => !ALPHA_DASH.is_match(&text),
    };

    failed.then(|| message(field, value, rule))
}

fn message(field: &str, value: &Value, rule: &Rule) -> String {
    let unit = if value.is_string() { " characters" } else { "" };
    match rule {
        Rule::Required => format!("The {field} field is required."),
        Rule::Email => format!("The {field} must be a valid email address."),
        Rule::Url => format!("The {field} must be a valid URL."),
        Rule::Numeric => format!("The {field} must be numeric."),
        Rule::Integer => format!("The {field} must be an integer."),
        Rule::Float => format!("The {field} must be a float."),
        Rule::Boolean => format!("The {field} must be a boolean."),
        Rule::Date => format!("The {field} must be a valid date."),
        Rule::Min(min) => format!("The {field} must be at least {}{unit}.", number(*min)),
        Rule::Max(max) => format!(
            "The {field} may not be greater than {}{unit}.",
            number(*max)
        ),
        Rule::Between(min, max) => format!(
            "The {field} must be between {} and {}{unit}.",
            number(*min),
            number(*max)
        ),
        Rule::Length(min, max) => {
            format!("The {field} must be between {min} and {max} characters.")
        }
        Rule::In(allowed) => format!(
            "The {field} must be one of the following: {}.",
            allowed.join(", ")
        ),
        Rule::NotIn(denied) => format!(
            "The {field} may not be one of the following: {}.",
            denied.join(", ")
        ),
        Rule::Regex(_) => format!("The {field} format is invalid."),
        Rule::Same(other) => format!("The {field} and {other} must match."),
        Rule::Different(other) => format!("The {field} and {other} must be different."),
        Rule::Alpha => format!("The {field} may only contain letters."),
        Rule::AlphaNum => format!("The {field} may only contain letters and numbers."),
        Rule::AlphaDash => format!(
            "The {field} may only contain letters, numbers, dashes and underscores."
        ),
        Rule::Unknown(name) => format!("Unknown validation rule: {name}."),
    }
}

fn number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn is_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
        Value::String(s) => s == "0" || s == "1",
        _ => false,
    }
}

fn is_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
}

/// Strings are measured by character count, numbers by value.
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_fields_reported() {
        let rules = Rules::new()
            .field("type", [Rule::Required, Rule::Length(2, 20)])
            .field("title", [Rule::Required])
            .field("content", [Rule::Required])
            .field("recipientList", [Rule::Required])
            .field("luDepartment", []);

        let errors = validate(&data(json!({"title": "t"})), &rules).unwrap_err();
        assert!(errors.contains("type"));
        assert!(errors.contains("content"));
        assert!(errors.contains("recipientList"));
        assert!(!errors.contains("title"));
        assert!(!errors.contains("luDepartment"));
        assert_eq!(
            errors.get("type").unwrap(),
            &["The type field is required.".to_string()]
        );
    }

    #[test]
    fn test_empty_string_fails_required_only() {
        let rules = Rules::new()
            .field("name", [Rule::Required, Rule::Length(2, 5)])
            .field("nick", [Rule::Length(2, 5)]);
        let errors = validate(&data(json!({"name": "", "nick": ""})), &rules).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("name").unwrap().len(), 1);
    }

    #[test]
    fn test_absent_optional_field_skipped() {
        let rules = Rules::new().field("email", [Rule::Email]);
        assert!(validate(&Map::new(), &rules).is_ok());
    }

    #[test]
    fn test_type_rules() {
        let rules = Rules::new()
            .field("email", [Rule::Email])
            .field("age", [Rule::Integer, Rule::Min(18.0)])
            .field("price", [Rule::Numeric])
            .field("active", [Rule::Boolean])
            .field("day", [Rule::Date])
            .field("site", [Rule::Url]);
        let ok = json!({
            "email": "a@b.io",
            "age": 30,
            "price": "12.5",
            "active": "1",
            "day": "2024-02-29",
            "site": "https://example.com/x"
        });
        assert!(validate(&data(ok), &rules).is_ok());

        let bad = json!({
            "email": "nope",
            "age": 12,
            "price": "abc",
            "active": "yes",
            "day": "2024-13-01",
            "site": "example"
        });
        let errors = validate(&data(bad), &rules).unwrap_err();
        assert_eq!(errors.len(), 6);
        assert_eq!(
            errors.get("age").unwrap(),
            &["The age must be at least 18.".to_string()]
        );
    }

    #[test]
    fn test_string_bounds_use_characters() {
        let rules = Rules::new().field("code", [Rule::Max(3.0)]);
        let errors = validate(&data(json!({"code": "ABCD"})), &rules).unwrap_err();
        assert_eq!(
            errors.get("code").unwrap(),
            &["The code may not be greater than 3 characters.".to_string()]
        );
        assert!(validate(&data(json!({"code": "ÄÖÜ"})), &rules).is_ok());
    }

    #[test]
    fn test_membership_and_comparison_rules() {
        let rules = Rules::new()
            .field("status", [Rule::In(vec!["open".into(), "closed".into()])])
            .field("password_confirmation", [Rule::Same("password".into())])
            .field("slug", [Rule::AlphaDash]);
        let errors = validate(
            &data(json!({
                "status": "pending",
                "password": "a",
                "password_confirmation": "b",
                "slug": "ok-slug_1"
            })),
            &rules,
        )
        .unwrap_err();
        assert_eq!(
            errors.get("status").unwrap(),
            &["The status must be one of the following: open, closed.".to_string()]
        );
        assert!(errors.contains("password_confirmation"));
        assert!(!errors.contains("slug"));
    }

    #[test]
    fn test_rule_spec_parsing() {
        assert_eq!(Rule::from_notation("required"), Rule::Required);
        assert_eq!(Rule::from_notation("length:2,20"), Rule::Length(2, 20));
        assert_eq!(Rule::from_notation("between:1,5"), Rule::Between(1.0, 5.0));
        assert_eq!(
            Rule::from_notation("in:a,b"),
            Rule::In(vec!["a".into(), "b".into()])
        );
        assert_eq!(Rule::from_notation("shiny"), Rule::Unknown("shiny".into()));
    }

    #[test]
    fn test_unknown_rule_reports_error() {
        let rules = Rules::new().field("x", [Rule::from_notation("shiny")]);
        let errors = validate(&data(json!({"x": "1"})), &rules).unwrap_err();
        assert_eq!(
            errors.get("x").unwrap(),
            &["Unknown validation rule: shiny.".to_string()]
        );
    }

    #[test]
    fn test_errors_serialize_as_object() {
        let mut errors = ValidationErrors::default();
        errors.add("a", "first");
        errors.add("a", "second");
        assert_eq!(errors.to_value(), json!({"a": ["first", "second"]}));
    }
}
