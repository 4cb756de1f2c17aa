//! HTTP transport seam.
//!
//! The agent builds an [`HttpRequest`] and hands it to a [`Transport`]; the
//! transport only moves bytes and never classifies the outcome.

pub mod http;
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Method;
use reqwest::header::HeaderMap;
use thiserror::Error;

pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport};

/// Raw response body, not yet consumed.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportFailure>>;

/// A request ready for dispatch. `url` is relative to the transport's base.
///
/// Transports always send credentials (cookies) with the request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// A response whose status line has arrived.
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: BodyStream,
}

impl HttpResponse {
    /// Build a response from a complete body
    pub fn from_bytes(status: u16, status_text: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let chunk: Result<Bytes, TransportFailure> = Ok(body.into());
        Self {
            status,
            status_text: status_text.into(),
            body: stream::iter(vec![chunk]).boxed(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into memory
    pub async fn bytes(self) -> Result<Vec<u8>, TransportFailure> {
        self.body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("body", &"<stream>")
            .finish()
    }
}

/// Network-level failure: the request never produced a response, or the
/// body broke off mid-stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Flatten an error and its source chain into one message
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self { message }
    }
}

/// Sends one HTTP request and yields the response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        (**self).send(request).await
    }
}
