//! Minimal HTTP/1.1 JSON POST over a Unix socket.
//!
//! Shared framing for the guest and host channels: one request per
//! connection, `Connection: close`, body read until EOF.

use std::io;
use std::path::Path;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Upper bound on a response (headers + body).
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Parsed response: status code and body.
#[derive(Debug)]
pub(crate) struct UdsResponse {
    pub status: u16,
    pub body: String,
}

impl UdsResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body trimmed for inclusion in an error message.
    pub fn body_excerpt(&self) -> String {
        self.body.trim().chars().take(200).collect()
    }
}

/// POST `payload` as JSON to `route` on the server listening at `socket_path`.
pub(crate) async fn post_json<T: Serialize>(
    socket_path: &Path,
    route: &str,
    payload: &T,
) -> io::Result<UdsResponse> {
    let body = serde_json::to_string(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let http_request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        route,
        body.len(),
        body,
    );

    let mut stream = UnixStream::connect(socket_path).await?;
    stream.write_all(http_request.as_bytes()).await?;

    let mut response = Vec::with_capacity(4096);
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.len() > MAX_RESPONSE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "response exceeds 1 MiB",
            ));
        }
    }

    parse_response(&String::from_utf8_lossy(&response))
}

fn parse_response(raw: &str) -> io::Result<UdsResponse> {
    let (head, body) = raw.split_once("\r\n\r\n").ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "malformed response: no HTTP body")
    })?;

    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "malformed response: no status line")
        })?;

    Ok(UdsResponse {
        status,
        body: body.to_string(),
    })
}
