//! RFC 7578 multipart/form-data parsing for buffered request bodies.
//!
//! The request model reads the whole body before dispatch, so this parser
//! works on a byte slice and yields owned parts. Security limits (part
//! count, part size, header size, name lengths) are configurable through
//! [`MultipartConfig`]; filenames are sanitized against path traversal.
//!
//! ```rust
//! use portico::multipart::{MultipartConfig, MultipartParser};
//!
//! let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n--XyZ--\r\n";
//! let parts = MultipartParser::new("XyZ", MultipartConfig::default())
//!     .unwrap()
//!     .parse(body)
//!     .unwrap();
//! assert_eq!(parts[0].field_name(), "title");
//! assert_eq!(parts[0].text(), "hello");
//! ```

use crate::error::AppError;
use log::{debug, trace};
use std::collections::HashMap;

const DEFAULT_MAX_PARTS: usize = 100;
const DEFAULT_MAX_PART_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_MAX_FILENAME_LENGTH: usize = 255;
const DEFAULT_MAX_FIELD_NAME_LENGTH: usize = 100;
const DEFAULT_MAX_HEADERS_SIZE: usize = 8 * 1024;
const MAX_BOUNDARY_LENGTH: usize = 70; // RFC 2046 limit

/// Configuration for multipart parsing with security limits
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Maximum number of parts allowed
    pub max_parts: usize,
    /// Maximum size per part in bytes
    pub max_part_size: usize,
    /// Maximum filename length
    pub max_filename_length: usize,
    /// Maximum field name length
    pub max_field_name_length: usize,
    /// Maximum size for part headers
    pub max_headers_size: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_parts: DEFAULT_MAX_PARTS,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
            max_field_name_length: DEFAULT_MAX_FIELD_NAME_LENGTH,
            max_headers_size: DEFAULT_MAX_HEADERS_SIZE,
        }
    }
}

/// Represents the Content-Disposition header of a multipart part
#[derive(Debug, Clone)]
pub struct ContentDisposition {
    pub disposition_type: String,
    pub name: String,
    pub filename: Option<String>,
    pub parameters: HashMap<String, String>,
}

/// Represents the headers of a multipart part
#[derive(Debug, Clone, Default)]
pub struct PartHeaders {
    pub disposition: Option<ContentDisposition>,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
}

impl PartHeaders {
    /// Parse part headers from a string
    pub fn parse(headers_str: &str, config: &MultipartConfig) -> Result<Self, AppError> {
        if headers_str.len() > config.max_headers_size {
            return Err(AppError::invalid_multipart(format!(
                "Part headers too large: {} bytes",
                headers_str.len()
            )));
        }

        let mut parsed = PartHeaders::default();
        for line in headers_str.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                AppError::invalid_multipart(format!("Invalid header format: {line}"))
            })?;
            let name = name.trim().to_lowercase();
            let value = value.trim().to_string();

            match name.as_str() {
                "content-disposition" => {
                    parsed.disposition = Some(Self::parse_content_disposition(&value, config)?);
                }
                "content-type" => parsed.content_type = Some(value.clone()),
                _ => {}
            }
            parsed.headers.insert(name, value);
        }

        Ok(parsed)
    }

    /// Parse the Content-Disposition header
    pub fn parse_content_disposition(
        value: &str,
        config: &MultipartConfig,
    ) -> Result<ContentDisposition, AppError> {
        let mut parts = value.split(';').map(str::trim);
        let disposition_type = parts.next().unwrap_or_default().to_lowercase();
        let mut name = String::new();
        let mut filename = None;
        let mut parameters = HashMap::new();

        for part in parts {
            let Some((key, val)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(val);

            match key.as_str() {
                "name" => {
                    if val.len() > config.max_field_name_length {
                        return Err(AppError::invalid_multipart(format!(
                            "Field name too long: {} characters",
                            val.len()
                        )));
                    }
                    if contains_invalid_field_chars(val) {
                        return Err(AppError::invalid_multipart(format!(
                            "Invalid characters in field name: {val}"
                        )));
                    }
                    name = val.to_string();
                }
                "filename" => {
                    if val.len() > config.max_filename_length {
                        return Err(AppError::invalid_multipart(format!(
                            "Filename too long: {} characters",
                            val.len()
                        )));
                    }
                    filename = Some(sanitize_filename(val)?);
                }
                _ => {
                    parameters.insert(key, val.to_string());
                }
            }
        }

        if name.is_empty() {
            return Err(AppError::invalid_multipart(
                "Missing 'name' in Content-Disposition",
            ));
        }

        Ok(ContentDisposition {
            disposition_type,
            name,
            filename,
            parameters,
        })
    }
}

/// Field names may carry the `[]` / `[key]` suffixes used by form arrays.
fn contains_invalid_field_chars(name: &str) -> bool {
    !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']'))
}

/// Sanitize filename to prevent path traversal attacks
fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(AppError::invalid_multipart(format!(
            "Invalid filename '{filename}'"
        )));
    }

    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();

    if sanitized.trim().is_empty() {
        return Err(AppError::invalid_multipart(
            "Empty filename after sanitization",
        ));
    }

    if sanitized.starts_with('.') {
        Ok(format!("file{sanitized}"))
    } else {
        Ok(sanitized)
    }
}

/// One decoded part of a multipart body.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub headers: PartHeaders,
    pub data: Vec<u8>,
}

impl MultipartPart {
    pub fn field_name(&self) -> &str {
        self.headers
            .disposition
            .as_ref()
            .map(|d| d.name.as_str())
            .unwrap_or_default()
    }

    pub fn filename(&self) -> Option<&str> {
        self.headers
            .disposition
            .as_ref()
            .and_then(|d| d.filename.as_deref())
    }

    pub fn is_file(&self) -> bool {
        self.filename().is_some()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

pub struct MultipartParser {
    boundary: String,
    config: MultipartConfig,
}

impl MultipartParser {
    pub fn new(boundary: &str, config: MultipartConfig) -> Result<Self, AppError> {
        validate_boundary(boundary)?;
        Ok(Self {
            boundary: boundary.to_string(),
            config,
        })
    }

    /// Extract boundary from Content-Type header
    pub fn extract_boundary_from_content_type(content_type: &str) -> Result<String, AppError> {
        if !content_type
            .to_lowercase()
            .starts_with("multipart/form-data")
        {
            return Err(AppError::invalid_multipart("Not multipart/form-data"));
        }

        for part in content_type.split(';').map(str::trim) {
            if part.len() > 9 && part[..9].eq_ignore_ascii_case("boundary=") {
                let boundary = part[9..].trim_matches('"');
                validate_boundary(boundary)?;
                return Ok(boundary.to_string());
            }
        }

        Err(AppError::invalid_multipart(
            "No boundary found in Content-Type",
        ))
    }

    /// Split `body` into parts.
    pub fn parse(&self, body: &[u8]) -> Result<Vec<MultipartPart>, AppError> {
        let delimiter = format!("--{}", self.boundary).into_bytes();
        let mut parts = Vec::new();

        let mut cursor = find_bytes(body, &delimiter, 0)
            .ok_or_else(|| AppError::invalid_multipart("Opening boundary not found"))?
            + delimiter.len();

        loop {
            if body[cursor..].starts_with(b"--") {
                trace!("Closing boundary reached after {} parts", parts.len());
                break;
            }
            cursor = skip_line_break(body, cursor);

            let headers_end = find_bytes(body, b"\r\n\r\n", cursor)
                .ok_or_else(|| AppError::invalid_multipart("Unterminated part headers"))?;
            let headers_str = std::str::from_utf8(&body[cursor..headers_end])
                .map_err(|_| AppError::invalid_multipart("Part headers are not UTF-8"))?;
            let headers = PartHeaders::parse(headers_str, &self.config)?;
            if headers.disposition.is_none() {
                return Err(AppError::invalid_multipart(
                    "Part is missing Content-Disposition",
                ));
            }

            let content_start = headers_end + 4;
            let next = find_bytes(body, &delimiter, content_start)
                .ok_or_else(|| AppError::invalid_multipart("Closing boundary not found"))?;
            let mut content_end = next;
            if content_end >= content_start + 2 && &body[content_end - 2..content_end] == b"\r\n"
            {
                content_end -= 2;
            }

            let data = body[content_start..content_end].to_vec();
            if data.len() > self.config.max_part_size {
                return Err(AppError::invalid_multipart(format!(
                    "Part exceeds {} bytes",
                    self.config.max_part_size
                )));
            }

            parts.push(MultipartPart { headers, data });
            if parts.len() > self.config.max_parts {
                return Err(AppError::invalid_multipart(format!(
                    "Too many parts (max {})",
                    self.config.max_parts
                )));
            }

            cursor = next + delimiter.len();
            if cursor >= body.len() {
                break;
            }
        }

        debug!("Parsed multipart body into {} parts", parts.len());
        Ok(parts)
    }
}

fn validate_boundary(boundary: &str) -> Result<(), AppError> {
    if boundary.is_empty() {
        return Err(AppError::invalid_multipart("Boundary too short"));
    }
    if boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(AppError::invalid_multipart("Boundary too long"));
    }
    if !boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c))
    {
        return Err(AppError::invalid_multipart(
            "Boundary contains invalid characters",
        ));
    }
    Ok(())
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn skip_line_break(body: &[u8], at: usize) -> usize {
    if body[at..].starts_with(b"\r\n") {
        at + 2
    } else if body[at..].starts_with(b"\n") {
        at + 1
    } else {
        at
    }
}
