use std::{collections::HashMap, fmt, str::FromStr};

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::headers::HeaderList;

pub const HEAD_DELIMITER: &[u8] = b"\r\n\r\n";
const DEFAULT_PROTOCOL: &str = "HTTP/1.1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("request head or target is not valid utf-8")]
    InvalidEncoding,
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Encrypt,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Encrypt => "ENCRYPT",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "ENCRYPT" => Ok(Self::Encrypt),
            _ => Err(ParseError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path with the query suffix removed.
    pub target: String,
    pub query: HashMap<String, String>,
    pub protocol: String,
    pub headers: HeaderList,
    /// Body bytes that arrived together with the head.
    pub body: Vec<u8>,
    /// Number of bytes consumed from the connection for this request so far.
    pub cursor: usize,
}

impl Request {
    /// Parses a request head (without the blank-line delimiter).
    pub fn parse(head: &[u8], body: Vec<u8>, cursor: usize) -> Result<Self, ParseError> {
        let head = std::str::from_utf8(head).map_err(|_| ParseError::InvalidEncoding)?;
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let tokens: Vec<&str> = request_line.split(' ').filter(|t| !t.is_empty()).collect();
        if !(2..=3).contains(&tokens.len()) {
            return Err(ParseError::MalformedRequestLine(request_line.to_string()));
        }

        let method = tokens[0].parse()?;
        let decoded = percent_decode_str(tokens[1])
            .decode_utf8()
            .map_err(|_| ParseError::InvalidEncoding)?
            .into_owned();
        let (target, query) = match decoded.split_once('?') {
            Some((path, query)) => (path.to_string(), parse_query(query)),
            None => (decoded.clone(), HashMap::new()),
        };
        let protocol = tokens.get(2).copied().unwrap_or(DEFAULT_PROTOCOL).to_string();

        let mut headers = HeaderList::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
            headers.insert(name, value);
        }

        Ok(Self {
            method,
            target,
            query,
            protocol,
            headers,
            body,
            cursor,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// True when the query parameter is present with the value `1`.
    pub fn query_flag(&self, name: &str) -> bool {
        self.query_param(name) == Some("1")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")
            .and_then(|value| value.trim().parse().ok())
    }

    /// Declared body bytes that have not been read yet.
    pub fn unread_body_len(&self) -> usize {
        self.content_length()
            .unwrap_or(0)
            .saturating_sub(self.body.len())
    }

    pub fn wants_keep_alive(&self) -> bool {
        self.header("Connection")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("keep-alive"))
    }

    /// Query string re-encoded as `k=v` pairs joined by `&`, sorted by key.
    pub fn query_string(&self) -> String {
        let mut pairs: Vec<_> = self.query.iter().collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn request_line(&self) -> String {
        if self.query.is_empty() {
            format!("{} {} {}", self.method, self.target, self.protocol)
        } else {
            format!(
                "{} {}?{} {}",
                self.method,
                self.target,
                self.query_string(),
                self.protocol
            )
        }
    }
}

/// Splits `&`-separated pairs on their first `=`. Later keys overwrite earlier
/// ones; a pair without `=` maps to an empty value.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.to_string(), value.to_string())
        })
        .collect()
}

/// Position of the head delimiter in `buf`, if any.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_DELIMITER.len())
        .position(|window| window == HEAD_DELIMITER)
}
