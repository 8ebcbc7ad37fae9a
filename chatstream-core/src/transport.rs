use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::config::{EndpointCfg, HttpCfg, ResponseFormat};
use crate::delta::ProviderFormat;
use crate::error::{ChatError, CoreResult};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::ChatRequest;
use crate::stream::{ByteStream, ai_stream};

/// Carries one exchange to the endpoint and returns the assembled text as bytes.
///
/// Implementations must return `ChatError::Cancelled` when the token fires
/// before a response arrived, and fail (rather than return a stream) on
/// transport errors, non-success statuses and missing bodies.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, req: ChatRequest, cancel: CancelToken) -> CoreResult<ByteStream>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    base_url: String,
    format: ResponseFormat,
    provider: ProviderFormat,
}

impl HttpTransport {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        format: ResponseFormat,
        provider: ProviderFormat,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            format,
            provider,
        }
    }

    pub fn from_cfg(endpoint: &EndpointCfg, http: &HttpCfg) -> CoreResult<Self> {
        Ok(Self::new(
            HttpClient::from_cfg(http)?,
            endpoint.base_url.clone(),
            endpoint.format,
            endpoint.provider,
        ))
    }

    /// Absolute URLs pass through; paths are joined onto the base URL.
    pub fn resolve(&self, api: &str) -> String {
        if api.starts_with("http://") || api.starts_with("https://") {
            return api.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            api.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, req: ChatRequest, cancel: CancelToken) -> CoreResult<ByteStream> {
        let url = self.resolve(&req.api);
        let ctx = RequestCtx {
            request_id: Some(&req.request_id),
            conversation_id: Some(&req.conversation_id),
        };
        let upstream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            resp = self.http.post_stream(&url, &req.body, &[], &ctx) => resp?,
        };
        tracing::debug!(url = %url, status = upstream.status.as_u16(), "response started");
        match self.format {
            ResponseFormat::EventStream => ai_stream(upstream, self.provider.extractor()),
            ResponseFormat::PlainText => upstream.body.ok_or(ChatError::EmptyBody),
        }
    }
}
