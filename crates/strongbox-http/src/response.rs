use std::path::PathBuf;

use crate::{headers::HeaderList, range::ByteRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Empty,
    Text(Vec<u8>),
    File(PathBuf),
}

/// One outgoing response. Built fresh per exchange through [`ResponseBuilder`];
/// framing headers are added by the serializer at send time.
#[derive(Debug, Clone)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderList,
    pub body: Body,
    /// Only honoured for [`Body::File`].
    pub ranges: Vec<ByteRange>,
    pub is_head: bool,
    pub chunked: bool,
}

impl Response {
    pub fn builder(status: u16, reason: impl Into<String>) -> ResponseBuilder {
        ResponseBuilder {
            response: Response {
                version: "1.1".to_string(),
                status,
                reason: reason.into(),
                headers: HeaderList::new(),
                body: Body::Empty,
                ranges: Vec::new(),
                is_head: false,
                chunked: false,
            },
        }
    }

    pub fn status_line(&self) -> String {
        format!("HTTP/{} {} {}", self.version, self.status, self.reason)
    }

    /// Applies the connection persistence decision for this exchange.
    pub fn with_connection(mut self, keep_alive: bool, keep_alive_value: Option<String>) -> Self {
        self.headers
            .insert("Connection", if keep_alive { "Keep-Alive" } else { "Close" });
        if let Some(value) = keep_alive_value {
            self.headers.insert("Keep-Alive", value);
        }
        self
    }
}

#[must_use]
#[derive(Debug)]
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.response.version = version.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.insert(name, value);
        self
    }

    pub fn content_type(self, value: impl Into<String>) -> Self {
        self.header("Content-Type", value)
    }

    pub fn text(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = Body::Text(body.into());
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.response.body = Body::File(path.into());
        self
    }

    pub fn ranges(mut self, ranges: Vec<ByteRange>) -> Self {
        self.response.ranges = ranges;
        self
    }

    pub fn head(mut self, is_head: bool) -> Self {
        self.response.is_head = is_head;
        self
    }

    pub fn chunked(mut self, chunked: bool) -> Self {
        self.response.chunked = chunked;
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}
