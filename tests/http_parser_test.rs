// SPDX-License-Identifier: MIT

use portico::error::AppError;
use portico::http::{Method, RawRequest};
use portico::request::Request;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

const MAX_BODY: usize = 1024;

fn serve_and_parse(request: &[u8]) -> Result<RawRequest, AppError> {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let req_owned = request.to_vec();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = stream.write_all(&req_owned);
        let _ = stream.flush();
        // Keep connection until parser finishes on client side
        thread::sleep(Duration::from_millis(50));
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let result = RawRequest::from_stream(&mut client, MAX_BODY);
    handle.join().unwrap();
    result
}

fn parse_request(request: &[u8]) -> Request {
    Request::from_raw(serve_and_parse(request).unwrap(), None).unwrap()
}

#[test]
fn test_invalid_http_version_is_bad_request() {
    let result = serve_and_parse(b"GET / HTTP/2.0\r\nHost: x\r\n\r\n");
    assert!(matches!(result, Err(AppError::BadRequest)));
}

#[test]
fn test_lf_only_headers_separator() {
    let request = parse_request(b"GET /%2Fpath HTTP/1.1\nHost: x\nContent-Length: 0\n\n");
    assert_eq!(request.path(), "//path");
    assert_eq!(request.header("host"), Some("x"));
}

#[test]
fn test_chunked_encoding_rejected() {
    let result = serve_and_parse(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n");
    assert!(matches!(result, Err(AppError::BadRequest)));
}

#[test]
fn test_oversized_body_rejected_before_reading() {
    let result = serve_and_parse(b"POST / HTTP/1.1\r\nContent-Length: 999999\r\n\r\n");
    assert!(matches!(result, Err(AppError::PayloadTooLarge(1024))));
}

#[test]
fn test_form_body_and_query() {
    let body = "username=jane+doe&roles%5B%5D=a&roles%5B%5D=b";
    let raw = format!(
        "POST /api/v1/auth/login?page=2&q=a%20b HTTP/1.1\r\n\
         Host: x\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {}\r\n\
         Cookie: session=abc; theme=dark\r\n\r\n{body}",
        body.len()
    );
    let request = parse_request(raw.as_bytes());

    assert_eq!(request.method(), Method::Post);
    assert_eq!(request.path(), "/api/v1/auth/login");
    assert_eq!(request.data_str("username").as_deref(), Some("jane doe"));
    assert_eq!(request.data()["roles"], serde_json::json!(["a", "b"]));
    assert_eq!(request.query("q").and_then(|v| v.as_str()), Some("a b"));
    assert_eq!(request.cookie("theme"), Some("dark"));
}

#[test]
fn test_json_body_with_method_override() {
    let body = r#"{"_method":"DELETE","dbCode":"NC1","count":3}"#;
    let raw = format!(
        "POST /things HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let request = parse_request(raw.as_bytes());

    assert_eq!(request.method(), Method::Delete);
    assert_eq!(request.transport_method(), Method::Post);
    assert_eq!(request.data_str("dbCode").as_deref(), Some("NC1"));
    assert_eq!(request.data_i64("count"), Some(3));
    assert!(request.is_json());
}

#[test]
fn test_unsupported_method_is_reported() {
    let raw = serve_and_parse(b"TRACE / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    assert!(matches!(
        Request::from_raw(raw, None),
        Err(AppError::UnsupportedMethod(m)) if m == "TRACE"
    ));
}

#[test]
fn test_multipart_fields_and_files() {
    let body = "--XyZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        Quarterly\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"report\"; filename=\"q1.csv\"\r\n\
        Content-Type: text/csv\r\n\r\n\
        a,b\n1,2\r\n\
        --XyZ--\r\n";
    let raw = format!(
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let request = parse_request(raw.as_bytes());

    assert_eq!(request.data_str("title").as_deref(), Some("Quarterly"));
    let file = request.file("report").unwrap();
    assert_eq!(file.filename, "q1.csv");
    assert_eq!(file.content_type.as_deref(), Some("text/csv"));
    assert_eq!(file.bytes, b"a,b\n1,2");
    assert!(!request.has("report"));
}
