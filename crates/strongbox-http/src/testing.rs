//! Client-side helpers for driving the engine over in-memory pipes in tests.

use strongbox_crypto::{SessionCipher, SessionKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::{headers::HeaderList, request::find_head_end};

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status_line: String,
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    /// Decoded chunk sizes, including the terminating zero, for chunked bodies.
    pub chunk_sizes: Vec<usize>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Takes one complete response off the front of `buf`, or returns `None` if
/// more bytes are needed.
pub fn take_response(buf: &mut Vec<u8>, head_only: bool) -> Option<RawResponse> {
    let head_end = find_head_end(buf)?;
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next()?.to_string();
    let status = status_line.split(' ').nth(1)?.parse().ok()?;
    let mut headers = HeaderList::new();
    for line in lines {
        let (name, value) = line.split_once(": ")?;
        headers.insert(name, value);
    }

    let body_start = head_end + 4;
    let mut body = Vec::new();
    let mut chunk_sizes = Vec::new();
    let consumed = if head_only {
        body_start
    } else if headers.get("Transfer-Encoding") == Some("chunked") {
        let mut pos = body_start;
        loop {
            let line_end = pos + find_crlf(buf.get(pos..)?)?;
            let size = usize::from_str_radix(std::str::from_utf8(&buf[pos..line_end]).ok()?, 16)
                .ok()?;
            let data_start = line_end + 2;
            let data_end = data_start + size;
            if buf.len() < data_end + 2 {
                return None;
            }
            body.extend_from_slice(&buf[data_start..data_end]);
            chunk_sizes.push(size);
            pos = data_end + 2;
            if size == 0 {
                break pos;
            }
        }
    } else {
        let len: usize = headers
            .get("Content-Length")
            .map_or(Some(0), |value| value.parse().ok())?;
        if buf.len() < body_start + len {
            return None;
        }
        body.extend_from_slice(&buf[body_start..body_start + len]);
        body_start + len
    };

    buf.drain(..consumed);
    Some(RawResponse {
        status_line,
        status,
        headers,
        body,
        chunk_sizes,
    })
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

/// Reads until EOF and splits the stream into responses.
pub async fn read_all_responses(stream: &mut DuplexStream) -> Vec<RawResponse> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let mut responses = Vec::new();
    while let Some(response) = take_response(&mut buf, false) {
        responses.push(response);
    }
    assert!(buf.is_empty(), "trailing bytes after last response");
    responses
}

/// Speaks to a connection from the client end of a duplex pipe.
pub struct TestClient {
    stream: DuplexStream,
    cipher: Option<SessionCipher>,
    buf: Vec<u8>,
}

impl TestClient {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            cipher: None,
            buf: Vec::new(),
        }
    }

    pub fn install_cipher(&mut self, key: &SessionKey) {
        self.cipher = Some(SessionCipher::new(key).unwrap());
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        let mut bytes = bytes.to_vec();
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.encrypt(&mut bytes);
        }
        self.stream.write_all(&bytes).await.unwrap();
    }

    /// Next response, or `None` once the server closed the pipe.
    pub async fn response(&mut self, head_only: bool) -> Option<RawResponse> {
        loop {
            if let Some(response) = take_response(&mut self.buf, head_only) {
                return Some(response);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            if let Some(cipher) = self.cipher.as_mut() {
                cipher.decrypt(&mut chunk[..n]);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn roundtrip(&mut self, request: &str) -> RawResponse {
        self.send(request.as_bytes()).await;
        self.response(request.starts_with("HEAD ")).await.unwrap()
    }

    /// True once the server side has closed and nothing else is pending.
    pub async fn closed(&mut self) -> bool {
        let mut chunk = [0u8; 64];
        matches!(self.stream.read(&mut chunk).await, Ok(0)) && self.buf.is_empty()
    }
}
