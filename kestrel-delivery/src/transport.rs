//! HTTP transport seam.
//!
//! The engine never opens sockets. A [`Transport`] posts prepared header and
//! body bytes and hands back the status, headers and body of the response;
//! connect and read timeouts surface as ordinary I/O errors.

use std::{collections::VecDeque, fmt::Debug, io};

use async_trait::async_trait;
use kestrel_common::{
    Headers, MimeBody,
    headers::{CONTENT_TYPE, MIME_VERSION},
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Empty `200 OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self::status(200, "OK")
    }

    #[must_use]
    pub fn status(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }
}

/// The MIME entity headers (`Content-*`, `Mime-Version`) among HTTP headers.
#[must_use]
pub fn entity_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| {
            name.get(..8)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("content-"))
                || name.eq_ignore_ascii_case(MIME_VERSION)
        })
        .collect()
}

/// Transport headers followed by the entity headers of `body`.
#[must_use]
pub fn request_for(headers: &Headers, body: &MimeBody) -> HttpRequest {
    let mut all = headers.clone();
    for (name, value) in body.headers().iter() {
        all.set(name, value);
    }

    HttpRequest {
        headers: all,
        body: body.content().to_vec(),
    }
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// POST `request` to `url`.
    ///
    /// # Errors
    /// Connection failures and timeouts.
    async fn post(&self, url: &str, request: HttpRequest) -> io::Result<HttpResponse>;
}

#[derive(Debug)]
enum Scripted {
    Respond(HttpResponse),
    Fail(io::ErrorKind, String),
}

/// Scripted transport for tests.
///
/// Replies are consumed in order; once exhausted every post gets `200 OK`.
/// Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(String, HttpRequest)>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: HttpResponse) {
        self.replies.lock().push_back(Scripted::Respond(response));
    }

    pub fn fail(&self, kind: io::ErrorKind, message: &str) {
        self.replies
            .lock()
            .push_back(Scripted::Fail(kind, message.to_string()));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<(String, HttpRequest)> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, url: &str, request: HttpRequest) -> io::Result<HttpResponse> {
        self.requests.lock().push((url.to_string(), request));

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(kind, message)) => Err(io::Error::new(kind, message)),
            None => Ok(HttpResponse::ok()),
        }
    }
}
