use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{ChatError, CoreResult};
use crate::response::UpstreamResponse;

/// Request context carries correlation ids forwarded as headers.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub conversation_id: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    /// Streams are long-lived, so only the connect phase gets a timeout unless
    /// the config asks for a total one.
    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(ms) = cfg.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ChatError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("chatstream/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// POST JSON and hand back the streaming body.
    ///
    /// Non-success statuses are mapped to errors here, with the body text as message.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<UpstreamResponse> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(cid) = ctx.conversation_id {
            req = req.header("X-Conversation-Id", cid);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::debug!(error = %e, url, "request failed before a response");
            ChatError::Unavailable {
                endpoint: url.to_string(),
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        if !status.is_success() {
            let ra = parse_retry_after(&headers);
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, ra, &text));
        }

        let body = if status == StatusCode::NO_CONTENT {
            None
        } else {
            let endpoint = url.to_string();
            Some(
                resp.bytes_stream()
                    .map(move |r| {
                        r.map_err(|e| {
                            tracing::debug!(error = %e, endpoint = %endpoint, "body read failed");
                            ChatError::StreamInterrupted(e.to_string())
                        })
                    })
                    .boxed(),
            )
        };

        Ok(UpstreamResponse {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(endpoint: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> ChatError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        },
        s if s.is_server_error() => ChatError::Unavailable {
            endpoint: endpoint.to_string(),
        },
        s => {
            let message = if body.trim().is_empty() {
                "failed to fetch the chat response".to_string()
            } else {
                truncate(body, 300)
            };
            ChatError::Status {
                endpoint: endpoint.to_string(),
                code: s.as_u16(),
                message,
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut t = s[..idx].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}
