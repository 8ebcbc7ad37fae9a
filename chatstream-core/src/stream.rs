//! Stream assembly: raw event-stream bytes in, plain text bytes out.
//!
//! Contract:
//! - Every non-empty fragment is forwarded as soon as its frame completes.
//! - A `[DONE]` data frame ends the stream; bytes after it are never looked at.
//! - A malformed payload or an upstream read error is yielded once as `Err`,
//!   after any fragments that preceded it, and then the stream ends.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::delta::DeltaExtractor;
use crate::error::{ChatError, CoreResult};
use crate::response::UpstreamResponse;
use crate::sse::FrameParser;

/// Sentinel data payload that terminates a response.
pub const DONE: &str = "[DONE]";

/// Boxed byte stream, used for both raw upstream bodies and assembled text.
pub type ByteStream = BoxStream<'static, CoreResult<Bytes>>;

/// Frame + extract stage.
pub struct DeltaStream<E> {
    inner: ByteStream,
    parser: FrameParser,
    extractor: E,
    pending: VecDeque<CoreResult<String>>,
    finished: bool,
}

impl<E: DeltaExtractor> DeltaStream<E> {
    pub fn new(inner: ByteStream, extractor: E) -> Self {
        Self {
            inner,
            parser: FrameParser::new(),
            extractor,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn consume(&mut self, chunk: &[u8]) {
        for record in self.parser.feed(chunk) {
            let Some(data) = record.data() else {
                continue;
            };
            if data == DONE {
                tracing::trace!("done sentinel received");
                self.terminate();
                return;
            }
            match self.extractor.extract(data) {
                Ok(Some(text)) => self.pending.push_back(Ok(text)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.terminate();
                    return;
                }
            }
        }
    }

    fn terminate(&mut self) {
        self.finished = true;
        // release the upstream connection right away
        self.inner = futures::stream::empty().boxed();
    }
}

impl<E: DeltaExtractor + Unpin> Stream for DeltaStream<E> {
    type Item = CoreResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.consume(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => this.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Re-encode stage.
pub fn encode_text<S>(fragments: S) -> ByteStream
where
    S: Stream<Item = CoreResult<String>> + Send + 'static,
{
    fragments.map(|r| r.map(Bytes::from)).boxed()
}

/// Build the assembled text stream for an upstream response.
///
/// Fails up front when the upstream did not succeed or carries no body.
pub fn ai_stream<E>(upstream: UpstreamResponse, extractor: E) -> CoreResult<ByteStream>
where
    E: DeltaExtractor + Unpin + 'static,
{
    if !upstream.status.is_success() {
        return Err(ChatError::Status {
            endpoint: upstream.url,
            code: upstream.status.as_u16(),
            message: format!(
                "failed to convert the response to stream, received status code: {}",
                upstream.status.as_u16()
            ),
        });
    }
    let body = upstream.body.ok_or(ChatError::EmptyBody)?;
    Ok(encode_text(DeltaStream::new(body, extractor)))
}

/// Incremental UTF-8 decoder; incomplete code points wait for the next chunk.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    tail: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.tail.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.tail) {
                Ok(s) => {
                    out.push_str(s);
                    self.tail.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.tail[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.tail.drain(..valid + bad);
                        }
                        None => {
                            self.tail.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.tail).into_owned();
        self.tail.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::OpenAiDeltaExtractor;
    use http::{HeaderMap, StatusCode};

    fn chunks(parts: Vec<String>) -> ByteStream {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p)))).boxed()
    }

    fn frame(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    fn upstream(status: StatusCode, body: Option<ByteStream>) -> UpstreamResponse {
        UpstreamResponse {
            url: "http://test/api/chat".into(),
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    #[tokio::test]
    async fn stops_at_done_and_ignores_trailing_bytes() {
        let first = frame("Hi");
        let body = format!("{first}data: [DONE]\n\ndata: not-json\n\n");
        let parts = vec![body, "data: also-bad\n\n".to_string()];
        let mut s = DeltaStream::new(chunks(parts), OpenAiDeltaExtractor::new());
        assert_eq!(s.next().await.unwrap().unwrap(), "Hi");
        assert!(s.next().await.is_none());
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn frames_split_across_chunks() {
        let a = frame(" Hel");
        let b = frame("lo");
        let joined = format!("{a}{b}");
        let (x, y) = joined.split_at(a.len() - 5);
        let parts = vec![x.to_string(), y.to_string()];
        let out: Vec<String> = DeltaStream::new(chunks(parts), OpenAiDeltaExtractor::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn malformed_payload_follows_earlier_fragments() {
        let body = format!("{}data: {{oops\n\n{}", frame("a"), frame("b"));
        let parts = vec![body];
        let mut s = DeltaStream::new(chunks(parts), OpenAiDeltaExtractor::new());
        assert_eq!(s.next().await.unwrap().unwrap(), "a");
        assert!(matches!(
            s.next().await.unwrap(),
            Err(ChatError::MalformedPayload { .. })
        ));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn upstream_error_ends_stream() {
        let first = frame("x");
        let inner = futures::stream::iter(vec![
            Ok(Bytes::from(first)),
            Err(ChatError::StreamInterrupted("reset".into())),
            Ok(Bytes::from_static(b"data: {}\n\n")),
        ])
        .boxed();
        let out: Vec<CoreResult<String>> =
            DeltaStream::new(inner, OpenAiDeltaExtractor::new()).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().unwrap(), "x");
        assert!(matches!(out[1], Err(ChatError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn ai_stream_encodes_fragments_as_bytes() {
        let body = format!("{}{}data: [DONE]\n\n", frame("Hel"), frame("lo"));
        let parts = vec![body];
        let s = ai_stream(
            upstream(StatusCode::OK, Some(chunks(parts))),
            OpenAiDeltaExtractor::new(),
        )
        .unwrap();
        let bytes: Vec<Bytes> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(bytes, vec![Bytes::from("Hel"), Bytes::from("lo")]);
    }

    #[test]
    fn ai_stream_rejects_failed_status() {
        let err = ai_stream(
            upstream(StatusCode::BAD_GATEWAY, Some(chunks(vec![]))),
            OpenAiDeltaExtractor::new(),
        )
        .err()
        .expect("should fail");
        match err {
            ChatError::Status { code, message, .. } => {
                assert_eq!(code, 502);
                assert!(message.contains("502"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn ai_stream_rejects_missing_body() {
        let err = ai_stream(upstream(StatusCode::OK, None), OpenAiDeltaExtractor::new())
            .err()
            .expect("should fail");
        assert!(matches!(err, ChatError::EmptyBody));
    }

    #[test]
    fn chunk_decoder_carries_partial_code_points() {
        let bytes = "né€".as_bytes();
        let mut d = ChunkDecoder::new();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&d.decode(std::slice::from_ref(b)));
        }
        out.push_str(&d.finish());
        assert_eq!(out, "né€");
    }

    #[test]
    fn chunk_decoder_replaces_invalid_bytes() {
        let mut d = ChunkDecoder::new();
        assert_eq!(d.decode(&[b'a', 0xff, b'b']), "a\u{FFFD}b");
        assert_eq!(d.decode(&[0xe2, 0x82]), "");
        assert_eq!(d.finish(), "\u{FFFD}");
    }
}
