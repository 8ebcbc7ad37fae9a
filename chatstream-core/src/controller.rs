//! Conversation state machine.
//!
//! The controller owns the canonical snapshot and publishes every change as a
//! complete new `Snapshot` through a watch channel. At most one exchange is in
//! flight; its `CancelToken` sits in the `active` slot, and an exchange only
//! publishes while its token is still the active, uncancelled one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::field::Empty;
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument;

use crate::cancel::CancelToken;
use crate::config::{ChatOptions, DEFAULT_API};
use crate::error::{ChatError, CoreResult};
use crate::model::{
    ChatRequest, CreateMessage, Message, Role, Snapshot, new_id, now_ms, project, snapshot_of,
};
use crate::stream::ChunkDecoder;
use crate::telemetry::{self, ExchangeTrace, Outcome};
use crate::transport::ChatTransport;

/// Last failure, kept for display until the next exchange starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&ChatError> for LastError {
    fn from(e: &ChatError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

struct Shared {
    id: String,
    api: String,
    transport: Arc<dyn ChatTransport>,
    messages: watch::Sender<Snapshot>,
    input: Mutex<String>,
    active: Mutex<Option<CancelToken>>,
    error: Mutex<Option<LastError>>,
}

#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>, opts: ChatOptions) -> Self {
        let (messages, _) = watch::channel(snapshot_of(opts.initial_messages));
        Self {
            inner: Arc::new(Shared {
                id: opts.id.unwrap_or_else(new_id),
                api: opts.api.unwrap_or_else(|| DEFAULT_API.to_string()),
                transport,
                messages,
                input: Mutex::new(opts.initial_input),
                active: Mutex::new(None),
                error: Mutex::new(None),
            }),
        }
    }

    /// Conversation key.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn api(&self) -> &str {
        &self.inner.api
    }

    pub fn messages(&self) -> Snapshot {
        self.inner.messages.borrow().clone()
    }

    /// Read-only view for renderers; every change is a full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.messages.subscribe()
    }

    pub fn input(&self) -> String {
        lock(&self.inner.input).clone()
    }

    pub fn set_input(&self, value: impl Into<String>) {
        *lock(&self.inner.input) = value.into();
    }

    pub fn handle_input_change(&self, value: &str) {
        self.set_input(value);
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner.active).is_some()
    }

    pub fn error(&self) -> Option<LastError> {
        lock(&self.inner.error).clone()
    }

    /// Replace the conversation wholesale. Request state is left alone.
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.inner.messages.send_replace(snapshot_of(messages));
    }

    /// Add a message and run one exchange with the resulting snapshot.
    ///
    /// Returns the assembled reply, or `None` when stopped before any content.
    pub async fn append(&self, message: impl Into<CreateMessage>) -> CoreResult<Option<String>> {
        let message = message.into().into_message();
        let mut next = self.messages().to_vec();
        next.push(message);
        self.trigger(snapshot_of(next)).await
    }

    /// Submit the input buffer as a user message without waiting for the reply.
    pub fn handle_submit(&self) -> Option<JoinHandle<CoreResult<Option<String>>>> {
        let input = self.input();
        if input.is_empty() {
            return None;
        }
        let this = self.clone();
        let handle = tokio::spawn(
            async move { this.append(CreateMessage::user(input)).await }
                .instrument(tracing::Span::current()),
        );
        self.set_input("");
        Some(handle)
    }

    /// Cancel the in-flight exchange, if any. Partial content stays.
    pub fn stop(&self) {
        if let Some(token) = lock(&self.inner.active).take() {
            debug!(conversation = %self.inner.id, "stop requested");
            token.cancel();
        }
    }

    /// Regenerate the last reply, or retry the last user turn as-is.
    pub async fn reload(&self) -> CoreResult<Option<String>> {
        let current = self.messages();
        let Some(last) = current.last() else {
            return Ok(None);
        };
        let snapshot = if last.role == Role::Assistant {
            snapshot_of(current[..current.len() - 1].to_vec())
        } else {
            current.clone()
        };
        self.trigger(snapshot).await
    }

    fn begin(&self) -> CoreResult<CancelToken> {
        let mut active = lock(&self.inner.active);
        if active.is_some() {
            return Err(ChatError::Busy);
        }
        let token = CancelToken::new();
        *active = Some(token.clone());
        *lock(&self.inner.error) = None;
        Ok(token)
    }

    /// Release the slot and keep the error, but only while `token` still owns it.
    fn finish(&self, token: &CancelToken, error: Option<&ChatError>) {
        let mut active = lock(&self.inner.active);
        if active.as_ref().is_some_and(|t| t.same_as(token)) {
            *active = None;
            if let Some(e) = error {
                *lock(&self.inner.error) = Some(LastError::from(e));
            }
        }
    }

    /// Publish only while `token` owns the conversation.
    fn publish(&self, token: &CancelToken, snapshot: Snapshot) -> bool {
        let active = lock(&self.inner.active);
        let owned = active.as_ref().is_some_and(|t| t.same_as(token)) && !token.is_cancelled();
        if owned {
            self.inner.messages.send_replace(snapshot);
        }
        owned
    }

    async fn trigger(&self, snapshot: Snapshot) -> CoreResult<Option<String>> {
        let token = self.begin()?;
        let request_id = new_id();
        let span = info_span!(
            "chat.exchange",
            "conversation.id" = %self.inner.id,
            "request.id" = %request_id,
            "endpoint" = %self.inner.api,
            "reply.id" = Empty,
            "exchange.outcome" = Empty,
            "exchange.chunks" = Empty,
            "exchange.chars" = Empty,
            "latency.ms" = Empty,
            "error.kind" = Empty,
            "error.message" = Empty,
        );
        let started = Instant::now();
        let mut trace = ExchangeTrace::new(&self.inner.id, &request_id, &self.inner.api);

        let result = self
            .run(snapshot, &token, &request_id, &mut trace)
            .instrument(span.clone())
            .await;
        self.finish(&token, result.as_ref().err());

        trace.latency_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = &result {
            trace = trace.error(e);
            span.record(telemetry::KEY_ERROR_KIND, e.kind());
            span.record(telemetry::KEY_ERROR_MESSAGE, e.to_string().as_str());
        }
        span.record(telemetry::KEY_OUTCOME, trace.outcome.as_str());
        span.record(telemetry::KEY_CHUNKS, trace.chunks);
        span.record(telemetry::KEY_CHARS, trace.chars);
        span.record(telemetry::KEY_LATENCY_MS, trace.latency_ms);
        telemetry::emit(trace);
        result
    }

    async fn run(
        &self,
        snapshot: Snapshot,
        token: &CancelToken,
        request_id: &str,
        trace: &mut ExchangeTrace,
    ) -> CoreResult<Option<String>> {
        let previous = self.messages();
        self.publish(token, snapshot.clone());

        let req = ChatRequest {
            api: self.inner.api.clone(),
            conversation_id: self.inner.id.clone(),
            request_id: request_id.to_string(),
            body: project(&snapshot),
        };
        let mut body = match self.inner.transport.send(req, token.clone()).await {
            Ok(body) => body,
            Err(ChatError::Cancelled) => {
                trace.outcome = Outcome::Cancelled;
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "exchange failed, restoring previous messages");
                self.publish(token, previous);
                trace.outcome = Outcome::RolledBack;
                return Err(e);
            }
        };

        let reply_id = new_id();
        let created_at = now_ms();
        tracing::Span::current().record(telemetry::KEY_REPLY_ID, reply_id.as_str());
        trace.reply_id = Some(reply_id.clone());

        let mut decoder = ChunkDecoder::new();
        let mut result = String::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = body.next() => item,
            };
            if token.is_cancelled() {
                break;
            }
            let text = match item {
                Some(Ok(bytes)) => decoder.decode(&bytes),
                None => {
                    let rest = decoder.finish();
                    if rest.is_empty() {
                        break;
                    }
                    rest
                }
                Some(Err(ChatError::Cancelled)) => {
                    trace.outcome = Outcome::Cancelled;
                    return Ok((!result.is_empty()).then_some(result));
                }
                Some(Err(e)) => {
                    if trace.chunks == 0 {
                        warn!(error = %e, "stream failed before any content, restoring previous messages");
                        self.publish(token, previous);
                        trace.outcome = Outcome::RolledBack;
                    } else {
                        warn!(error = %e, chunks = trace.chunks, "stream failed, keeping partial reply");
                        trace.outcome = Outcome::Truncated;
                    }
                    return Err(e);
                }
            };
            if text.is_empty() {
                continue;
            }
            result.push_str(&text);
            let mut next = snapshot.to_vec();
            next.push(Message {
                id: reply_id.clone(),
                created_at_ms: Some(created_at),
                content: result.clone(),
                role: Role::Assistant,
            });
            if !self.publish(token, snapshot_of(next)) {
                break;
            }
            trace.chunks += 1;
            trace.chars = result.chars().count() as u64;
            debug!(chunk = trace.chunks, chars = trace.chars, "chunk merged");
        }

        if token.is_cancelled() {
            trace.outcome = Outcome::Cancelled;
            return Ok((!result.is_empty()).then_some(result));
        }
        trace.outcome = Outcome::Completed;
        Ok(Some(result))
    }
}
