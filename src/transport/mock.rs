//! A programmable transport for exercising the agent without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use super::{HttpRequest, HttpResponse, Transport, TransportFailure};

/// Canned reply for the next dispatched request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond {
        status: u16,
        status_text: String,
        body: Vec<u8>,
    },
    /// 200 whose body yields `partial` and then breaks off with `message`.
    BrokenBody {
        partial: Vec<u8>,
        message: String,
    },
    Fail(String),
}

impl MockReply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::Respond {
            status: 200,
            status_text: "OK".to_string(),
            body: body.into(),
        }
    }

    pub fn status(status: u16, status_text: impl Into<String>) -> Self {
        Self::Respond {
            status,
            status_text: status_text.into(),
            body: Vec::new(),
        }
    }
}

/// Replies are consumed in FIFO order; every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next request
    pub fn push_reply(&self, reply: MockReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Requests received so far, in dispatch order
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        lock(&self.requests).push(request.clone());
        let reply = lock(&self.replies).pop_front();

        match reply {
            Some(MockReply::Respond {
                status,
                status_text,
                body,
            }) => Ok(HttpResponse::from_bytes(status, status_text, body)),
            Some(MockReply::BrokenBody { partial, message }) => {
                let chunks = vec![Ok(Bytes::from(partial)), Err(TransportFailure::new(message))];
                Ok(HttpResponse {
                    status: 200,
                    status_text: "OK".to_string(),
                    body: stream::iter(chunks).boxed(),
                })
            }
            Some(MockReply::Fail(message)) => Err(TransportFailure::new(message)),
            None => Err(TransportFailure::new(format!(
                "MockTransport: unexpected request to '{}'",
                request.url
            ))),
        }
    }
}
