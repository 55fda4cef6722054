//! Small INI reader: sections, `key = value` pairs, `#`/`;` comments and a
//! handful of typed getters (sizes, durations, lists).

use crate::error::AppError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct IniConfig {
    sections: HashMap<String, HashMap<String, String>>,
    global: HashMap<String, String>,
}

impl IniConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, AppError> {
        let mut config = Self::new();
        let mut current_section = String::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            let line_number = index + 1;

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].trim().to_string();
                if current_section.is_empty() {
                    return Err(AppError::configuration(format!(
                        "Empty section name at line {line_number}"
                    )));
                }
                config.sections.entry(current_section.clone()).or_default();
                continue;
            } else if line.starts_with('[') {
                // Malformed section header, ignored
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(AppError::configuration(format!(
                    "Invalid syntax at line {line_number}: {line}"
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(AppError::configuration(format!(
                    "Empty key at line {line_number}: {line}"
                )));
            }

            // Inline comments; `#` is only a comment after whitespace so glob
            // patterns and URLs with fragments survive
            let mut value = value.trim();
            for marker in [" #", " ;"] {
                if let Some(pos) = value.find(marker) {
                    value = value[..pos].trim();
                }
            }

            let target = if current_section.is_empty() {
                &mut config.global
            } else {
                config.sections.entry(current_section.clone()).or_default()
            };
            target.insert(key.to_string(), value.to_string());
        }

        Ok(config)
    }

    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        if section.is_empty() {
            self.global.get(key).cloned()
        } else {
            self.sections.get(section)?.get(key).cloned()
        }
    }

    pub fn get_u16(&self, section: &str, key: &str) -> Option<u16> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Option<usize> {
        self.get_string(section, key)?.parse().ok()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get_string(section, key)?.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn get_bool_or(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_bool(section, key).unwrap_or(default)
    }

    /// Comma-separated list, empty items dropped.
    pub fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get_string(section, key)
            .map(|s| {
                s.split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Byte size with optional B/KB/MB/GB suffix.
    pub fn get_size(&self, section: &str, key: &str) -> Option<u64> {
        parse_size(&self.get_string(section, key)?)
    }

    /// Duration with optional ms/s/m suffix; a bare number is seconds.
    pub fn get_duration(&self, section: &str, key: &str) -> Option<Duration> {
        parse_duration(&self.get_string(section, key)?)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }
}

pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_uppercase();

    if let Ok(num) = value.parse::<u64>() {
        return Some(num);
    }

    let (number, multiplier) = if let Some(n) = value.strip_suffix("GB") {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix('B') {
        (n, 1)
    } else {
        return None;
    };

    let number = number.trim();
    if let Ok(num) = number.parse::<u64>() {
        return num.checked_mul(multiplier);
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|n| *n >= 0.0)
        .map(|n| (n * multiplier as f64) as u64)
}

pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.trim().parse().ok().map(Duration::from_secs);
    }
    if let Some(m) = value.strip_suffix('m') {
        return m.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    value.parse().ok().map(Duration::from_secs)
}
