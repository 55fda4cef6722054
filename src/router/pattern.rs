//! Route template compilation.
//!
//! Templates are made of literal text, `:name` parameters and `[...]`
//! optional groups, e.g. `/users/:id[/posts/:slug]`. A parameter whose name
//! is a registered pattern (`id`, `uuid`, `slug`, ...) only matches that
//! pattern; any other name matches one or more non-slash characters.

use crate::error::AppError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Fallback for parameters without a registered pattern.
pub const DEFAULT_PARAM_PATTERN: &str = "[^/]+";

/// Named parameter patterns available to templates.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: HashMap<String, String>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        let builtin = [
            ("id", "[0-9]+"),
            ("slug", "[a-z0-9-]+"),
            (
                "uuid",
                "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            ),
            ("alpha", "[a-zA-Z]+"),
            ("alphanumeric", "[a-zA-Z0-9]+"),
            ("number", r"[0-9]+(?:\.[0-9]+)?"),
        ];
        Self {
            patterns: builtin
                .into_iter()
                .map(|(name, pattern)| (name.to_string(), pattern.to_string()))
                .collect(),
        }
    }
}

impl PatternRegistry {
    /// Register (or replace) a named pattern. The expression must compile on
    /// its own.
    pub fn register(&mut self, name: &str, pattern: &str) -> Result<(), AppError> {
        Regex::new(&format!("^(?:{pattern})$")).map_err(|e| AppError::InvalidPattern {
            template: format!(":{name}"),
            reason: e.to_string(),
        })?;
        self.patterns.insert(name.to_string(), pattern.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> &str {
        self.patterns
            .get(name)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PARAM_PATTERN)
    }
}

/// A compiled route template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
    params: Vec<String>,
}

impl PathPattern {
    pub fn compile(template: &str, patterns: &PatternRegistry) -> Result<Self, AppError> {
        let invalid = |reason: String| AppError::InvalidPattern {
            template: template.to_string(),
            reason,
        };

        let mut source = String::from("^");
        let mut params = Vec::new();
        let mut depth = 0usize;
        let mut chars = template.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            match c {
                ':' => {
                    let mut name = String::new();
                    while let Some(&(_, next)) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        source.push_str(&regex::escape(":"));
                        continue;
                    }
                    source.push_str(&format!("(?P<{name}>{})", patterns.get(&name)));
                    params.push(name);
                }
                '[' => {
                    depth += 1;
                    source.push_str("(?:");
                }
                ']' => {
                    if depth == 0 {
                        return Err(invalid("unbalanced ']'".to_string()));
                    }
                    depth -= 1;
                    source.push_str(")?");
                }
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }

        if depth != 0 {
            return Err(invalid("unclosed '['".to_string()));
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            params,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Captured parameters, or `None` when `path` does not match. Parameters
    /// inside an optional group that did not match are absent.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

/// Rebuild a concrete path from a template. Optional groups survive only when
/// every parameter inside them is supplied; other missing parameters are
/// dropped.
pub fn build_path(template: &str, params: &BTreeMap<String, String>) -> String {
    // Each frame holds the text of one optional group and whether all of its
    // parameters were supplied
    let mut frames: Vec<(String, bool)> = vec![(String::new(), true)];
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ':' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let Some(frame) = frames.last_mut() else {
                    break;
                };
                if name.is_empty() {
                    frame.0.push(':');
                    continue;
                }
                match params.get(&name) {
                    Some(value) => frame.0.push_str(value),
                    None => frame.1 = false,
                }
            }
            '[' => frames.push((String::new(), true)),
            ']' if frames.len() > 1 => {
                if let Some((text, complete)) = frames.pop()
                    && complete
                    && let Some(parent) = frames.last_mut()
                {
                    parent.0.push_str(&text);
                }
            }
            other => {
                if let Some(frame) = frames.last_mut() {
                    frame.0.push(other);
                }
            }
        }
    }

    // Unclosed groups are flattened into their parent
    while frames.len() > 1 {
        if let Some((text, _)) = frames.pop()
            && let Some(parent) = frames.last_mut()
        {
            parent.0.push_str(&text);
        }
    }
    frames.pop().map(|(text, _)| text).unwrap_or_default()
}
