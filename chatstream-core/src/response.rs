use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;

use crate::stream::ByteStream;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// What came back from the network before any framing was applied.
pub struct UpstreamResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// `None` when the response carries no body at all (e.g. 204).
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Assembled plain-text stream ready to hand back to a UI layer or an HTTP server.
pub struct StreamingTextResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl StreamingTextResponse {
    pub fn new(body: ByteStream) -> Self {
        Self::with_headers(body, HeaderMap::new())
    }

    /// Caller headers win over the default content type.
    pub fn with_headers(body: ByteStream, extra: HeaderMap) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
        for (name, value) in extra.iter() {
            headers.insert(name.clone(), value.clone());
        }
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}
