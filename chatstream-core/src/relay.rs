//! Server-side relay: forwards a conversation to an OpenAI-compatible
//! completions endpoint and hands back the assembled plain-text stream.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::{HttpCfg, RelayCfg};
use crate::delta::OpenAiDeltaExtractor;
use crate::error::{ChatError, CoreResult};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::ChatMessage;
use crate::response::StreamingTextResponse;
use crate::stream::ai_stream;

#[derive(Debug, Clone)]
pub struct Relay {
    http: HttpClient,
    base: String,
    api_key: SecretString,
    model: String,
}

#[derive(Serialize)]
struct CompletionReq<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

impl Relay {
    pub fn new(http: HttpClient, api_key: SecretString, base: String, model: String) -> Self {
        Self {
            http,
            base,
            api_key,
            model,
        }
    }

    /// Reads the key from the environment variable named in the config.
    pub fn from_cfg(relay: &RelayCfg, http: &HttpCfg) -> CoreResult<Self> {
        let key = std::env::var(&relay.api_key_env).map_err(|_| {
            ChatError::Validation(format!("environment variable {} is not set", relay.api_key_env))
        })?;
        Ok(Self::new(
            HttpClient::from_cfg(http)?,
            SecretString::new(key.into()),
            relay.upstream_base.clone(),
            relay.model.clone(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base.trim_end_matches('/'))
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<StreamingTextResponse> {
        if messages.is_empty() {
            return Err(ChatError::Validation("messages must not be empty".into()));
        }
        let auth = format!("Bearer {}", self.api_key.expose_secret());
        let body = CompletionReq {
            model: &self.model,
            messages,
            stream: true,
        };
        let url = self.url();
        tracing::debug!(url = %url, model = %self.model, turns = messages.len(), "relaying chat");
        let upstream = self
            .http
            .post_stream(&url, &body, &[("Authorization", auth.as_str())], ctx)
            .await?;
        let body = ai_stream(upstream, OpenAiDeltaExtractor::new())?;
        Ok(StreamingTextResponse::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::response::TEXT_CONTENT_TYPE;
    use futures::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn relay(base: &str) -> Relay {
        Relay::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            base.to_string(),
            "gpt-3.5-turbo".into(),
        )
    }

    fn turn(content: &str) -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: Role::User,
            content: content.into(),
        }]
    }

    #[tokio::test]
    async fn streams_assembled_text() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key")
                .json_body(json!({
                    "model": "gpt-3.5-turbo",
                    "messages": [{"role": "user", "content": "Hi"}],
                    "stream": true
                }));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"\\n\\nHi\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
                    "data: [DONE]\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n"
                ));
        });

        let resp = relay(&server.base_url())
            .complete(&turn("Hi"), &RequestCtx::default())
            .await
            .unwrap();
        assert_eq!(resp.content_type(), Some(TEXT_CONTENT_TYPE));
        let parts: Vec<_> = resp.body.map(|r| r.unwrap()).collect().await;
        let text: String = parts
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        assert_eq!(text, "Hi there");
        m.assert();
    }

    #[tokio::test]
    async fn upstream_rejection_is_an_error() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("{\"error\":\"bad key\"}");
        });
        let err = relay(&server.base_url())
            .complete(&turn("Hi"), &RequestCtx::default())
            .await
            .err()
            .unwrap();
        match err {
            ChatError::Status { code, .. } => assert_eq!(code, 401),
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected_locally() {
        let err = relay("http://127.0.0.1:9")
            .complete(&[], &RequestCtx::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn missing_key_env_is_a_validation_error() {
        let cfg = RelayCfg {
            api_key_env: "CHATSTREAM_TEST_UNSET_KEY_VAR".into(),
            ..RelayCfg::default()
        };
        let err = Relay::from_cfg(&cfg, &HttpCfg::default()).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
