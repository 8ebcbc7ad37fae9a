//! In-memory transport whose replies are scripted by the test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::cancel::CancelToken;
use crate::error::{ChatError, CoreResult};
use crate::model::ChatRequest;
use crate::stream::ByteStream;
use crate::transport::ChatTransport;

enum Reply {
    Fail(ChatError),
    Stream(mpsc::UnboundedReceiver<CoreResult<Bytes>>),
    /// Never answers; reports `Cancelled` once the token fires.
    Hang,
    /// Ignores the token and fails whenever the test says so.
    Late(oneshot::Receiver<ChatError>),
}

/// Pushes chunks into a scripted response body.
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<CoreResult<Bytes>>,
}

impl StreamFeed {
    pub fn send(&self, text: &str) {
        let _ = self.tx.send(Ok(Bytes::from(text.to_string())));
    }

    pub fn send_bytes(&self, bytes: &[u8]) {
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(bytes)));
    }

    pub fn fail(&self, err: ChatError) {
        let _ = self.tx.send(Err(err));
    }

    /// End of body.
    pub fn close(self) {}
}

#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_fail(&self, err: ChatError) {
        self.replies.lock().unwrap().push_back(Reply::Fail(err));
    }

    pub fn push_hang(&self) {
        self.replies.lock().unwrap().push_back(Reply::Hang);
    }

    pub fn push_stream(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.replies.lock().unwrap().push_back(Reply::Stream(rx));
        StreamFeed { tx }
    }

    pub fn push_late_failure(&self) -> oneshot::Sender<ChatError> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().push_back(Reply::Late(rx));
        tx
    }

    /// A body that is already complete.
    pub fn push_chunks(&self, parts: &[&str]) {
        let feed = self.push_stream();
        for p in parts {
            feed.send(p);
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, req: ChatRequest, cancel: CancelToken) -> CoreResult<ByteStream> {
        self.requests.lock().unwrap().push(req);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Stream(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Reply::Hang) => {
                cancel.cancelled().await;
                Err(ChatError::Cancelled)
            }
            Some(Reply::Late(rx)) => Err(rx
                .await
                .unwrap_or_else(|_| ChatError::Other(anyhow::anyhow!("late reply dropped")))),
            None => Err(ChatError::Other(anyhow::anyhow!("no scripted reply left"))),
        }
    }
}
