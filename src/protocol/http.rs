//! Minimal HTTP/1.1 framing
//!
//! Just enough of the protocol for the REST surface: request line, headers,
//! a Content-Length body, and keep-alive. Requests are accumulated in a
//! `BytesMut` buffer; a read of zero bytes between requests is a clean
//! disconnect.

use bytes::BytesMut;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{MiniStoreError, Result};

/// Largest accepted request body
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// A parsed HTTP request
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    /// Request target as sent, query string included
    pub target: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The target path without its query string
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }
}

/// Read one request from the stream
///
/// Returns `None` on a clean end-of-stream between requests.
pub async fn read_request(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> Result<Option<HttpRequest>> {
    loop {
        if let Some(head_end) = find_head_end(buffer) {
            let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
            let (method, target, headers) = parse_head(&head)?;

            let content_length = headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                .map(|(_, value)| {
                    value.parse::<usize>().map_err(|_| {
                        MiniStoreError::InvalidArgument("Invalid Content-Length header".into())
                    })
                })
                .transpose()?
                .unwrap_or(0);
            if content_length > MAX_BODY_SIZE {
                return Err(MiniStoreError::InvalidArgument(format!(
                    "Request body of {} bytes exceeds the {} byte limit",
                    content_length, MAX_BODY_SIZE
                )));
            }

            let total = head_end + 4 + content_length;
            while buffer.len() < total {
                let read = stream.read_buf(buffer).await?;
                if read == 0 {
                    return Err(MiniStoreError::InvalidArgument(
                        "Connection closed mid-request".into(),
                    ));
                }
            }

            let frame = buffer.split_to(total);
            let body = frame[head_end + 4..].to_vec();
            return Ok(Some(HttpRequest { method, target, headers, body }));
        }

        let read = stream.read_buf(buffer).await?;
        if read == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(MiniStoreError::InvalidArgument(
                "Connection closed mid-request".into(),
            ));
        }
    }
}

/// Find the end of the header block (`\r\n\r\n`)
fn find_head_end(buffer: &BytesMut) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

type ParsedHead = (String, String, Vec<(String, String)>);

fn parse_head(head: &str) -> Result<ParsedHead> {
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| MiniStoreError::InvalidArgument("Empty HTTP request".into()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| MiniStoreError::InvalidArgument("Malformed request line".into()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| MiniStoreError::InvalidArgument("Malformed request line".into()))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            MiniStoreError::InvalidArgument(format!("Malformed header line: {}", line))
        })?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok((method, target, headers))
}

/// Write a JSON response with the given status code
pub async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    body: &JsonValue,
) -> Result<()> {
    let payload = serde_json::to_vec(body)
        .map_err(|e| MiniStoreError::Internal(format!("Response encoding failed: {}", e)))?;
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        status,
        status_text(status),
        payload.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head() {
        let head = "POST /v1/x:commit HTTP/1.1\r\nContent-Length: 2\r\nAuthorization: Bearer owner";
        let (method, target, headers) = parse_head(head).unwrap();
        assert_eq!(method, "POST");
        assert_eq!(target, "/v1/x:commit");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].1, "Bearer owner");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = HttpRequest {
            method: "POST".into(),
            target: "/x".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Vec::new(),
        };
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(request.header("accept"), None);
    }

    #[test]
    fn test_path_strips_query() {
        let request = HttpRequest {
            method: "POST".into(),
            target: "/v1/x:commit?alt=json".into(),
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert_eq!(request.path(), "/v1/x:commit");
    }

    #[test]
    fn test_find_head_end() {
        let mut buffer = BytesMut::from(&b"POST / HTTP/1.1\r\nA: b\r\n\r\nbody"[..]);
        let end = find_head_end(&buffer).unwrap();
        assert_eq!(&buffer[end..end + 4], b"\r\n\r\n");
        let _ = buffer.split_to(end + 4);
        assert_eq!(&buffer[..], b"body");
    }

    #[test]
    fn test_malformed_head_rejected() {
        assert!(parse_head("").is_err());
        assert!(parse_head("POST").is_err());
        assert!(parse_head("POST /x HTTP/1.1\r\nbadheader").is_err());
    }
}
