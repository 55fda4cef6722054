//! Wire-level HTTP/1.x request parsing and the method type shared by the router.

use crate::error::AppError;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Default maximum size for a request body (10MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Maximum size for request headers (8KB) to prevent header buffer overflow
const MAX_HEADERS_SIZE: usize = 8 * 1024;

const BODY_CHUNK_SIZE: usize = 8192;

/// HTTP verbs understood by the framework.
///
/// `Head` is recognised on the wire but never routable, so it ends up in the
/// 404/405 branch of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
}

impl Method {
    /// Routable verbs in the order they are reported in `Allow`.
    pub const ROUTABLE: [Method; 6] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "HEAD" => Ok(Method::Head),
            other => Err(AppError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A request exactly as it arrived: nothing is decoded beyond the header split.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    /// Request target including any query string, still percent-encoded.
    pub target: String,
    /// Header names are lowercased; repeated headers are comma-joined.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawRequest {
    /// Parse one request from `stream`, reading at most `max_body_size` body bytes.
    pub fn from_stream<R: Read>(stream: &mut R, max_body_size: usize) -> Result<Self, AppError> {
        let (headers_data, remaining_bytes) = read_headers_with_remaining(stream)?;

        let mut lines = headers_data.lines();
        let request_line = lines.next().ok_or(AppError::BadRequest)?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(AppError::BadRequest);
        }

        let method = parts[0].to_string();
        let target = parts[1].to_string();
        if !parts[2].starts_with("HTTP/1.") {
            return Err(AppError::BadRequest);
        }

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim().to_lowercase();
                let value = value.trim().to_string();
                match headers.get_mut(&key) {
                    Some(existing) => {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    }
                    None => {
                        headers.insert(key, value);
                    }
                }
            }
        }

        let body = read_request_body(stream, &headers, remaining_bytes, max_body_size)?;

        debug!(
            "Parsed request: {} {} (headers: {}, body_size: {})",
            method,
            target,
            headers.len(),
            body.len()
        );

        Ok(RawRequest {
            method,
            target,
            headers,
            body,
        })
    }
}

/// Read the header block in chunks and return any body bytes read past it.
fn read_headers_with_remaining<R: Read>(stream: &mut R) -> Result<(String, Vec<u8>), AppError> {
    let mut buffer = vec![0; MAX_HEADERS_SIZE];
    let mut total_read = 0;

    loop {
        let bytes_read = match stream.read(&mut buffer[total_read..]) {
            Ok(0) if total_read == 0 => return Err(AppError::BadRequest),
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return Err(AppError::Io(e)),
        };
        total_read += bytes_read;

        let filled = &buffer[..total_read];
        let split = filled
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|pos| (pos, pos + 4))
            .or_else(|| {
                filled
                    .windows(2)
                    .position(|window| window == b"\n\n")
                    .map(|pos| (pos, pos + 2))
            });

        if let Some((headers_end, body_start)) = split {
            let headers = std::str::from_utf8(&filled[..headers_end])
                .map_err(|_| AppError::BadRequest)?;
            trace!("Header block complete after {total_read} bytes");
            return Ok((headers.to_string(), filled[body_start..].to_vec()));
        }

        if total_read >= buffer.len() {
            warn!("Request headers exceed {MAX_HEADERS_SIZE} bytes");
            return Err(AppError::BadRequest);
        }
    }

    // Connection closed before a blank line: treat everything as headers
    match std::str::from_utf8(&buffer[..total_read]) {
        Ok(data) => Ok((data.to_string(), Vec::new())),
        Err(_) => Err(AppError::BadRequest),
    }
}

/// Read the body announced by Content-Length.
fn read_request_body<R: Read>(
    stream: &mut R,
    headers: &HashMap<String, String>,
    remaining_bytes: Vec<u8>,
    max_body_size: usize,
) -> Result<Vec<u8>, AppError> {
    let content_length = match headers.get("content-length") {
        Some(length) => length.parse::<usize>().map_err(|_| AppError::BadRequest)?,
        None => {
            if let Some(encoding) = headers.get("transfer-encoding")
                && encoding.to_lowercase().contains("chunked")
            {
                warn!("Chunked transfer encoding is not supported");
                return Err(AppError::BadRequest);
            }
            return Ok(Vec::new());
        }
    };

    if content_length == 0 {
        return Ok(Vec::new());
    }
    if content_length > max_body_size {
        return Err(AppError::PayloadTooLarge(max_body_size as u64));
    }

    let mut body = Vec::with_capacity(content_length);
    let from_headers = remaining_bytes.len().min(content_length);
    body.extend_from_slice(&remaining_bytes[..from_headers]);

    let mut buffer = vec![0; BODY_CHUNK_SIZE];
    while body.len() < content_length {
        let to_read = (content_length - body.len()).min(BODY_CHUNK_SIZE);
        match stream.read(&mut buffer[..to_read]) {
            Ok(0) => return Err(AppError::BadRequest),
            Ok(n) => body.extend_from_slice(&buffer[..n]),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    warn!("Request body read timeout");
                }
                return Err(AppError::Io(e));
            }
        }
    }

    debug!("Read request body: {} bytes", body.len());
    Ok(body)
}
