//! The remote call agent.
//!
//! Each call is one linear round trip: build the request, dispatch it once,
//! classify the response, settle. Nothing is retried and nothing outlives the
//! call except the request-id counter.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::error::CallError;
use crate::protocol::{JsonRpcRequest, decode_response};
use crate::transport::{BodyStream, HttpRequest, HttpResponse, Transport};

/// HTTP status unauthorized (401).
pub const HTTP_UNAUTHORIZED: u16 = 401;

pub const APPLICATION_JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// HTTP methods the agent can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("Unsupported HTTP method: {}", other)),
        }
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Options => Method::OPTIONS,
        }
    }
}

/// How the body of a successful generic call is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBodyType {
    #[default]
    Json,
    Text,
    ReadableStream,
}

impl FromStr for ResponseBodyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ResponseBodyType::Json),
            "text" => Ok(ResponseBodyType::Text),
            "stream" | "readable_stream" | "readable-stream" => {
                Ok(ResponseBodyType::ReadableStream)
            }
            other => Err(format!("Unknown response body type: {}", other)),
        }
    }
}

/// Agent settings fixed at construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfig {
    /// Prepended to every path, e.g. `kv` turns `/users` into `kv/users`.
    pub url_prefix: Option<String>,
}

/// Transport-level options laid under the agent's own.
///
/// `Content-Type` and `X-Requested-With` are always overwritten by the agent,
/// and credentials are always included.
#[derive(Debug, Clone, Default)]
pub struct RequestOverlay {
    pub headers: HeaderMap,
}

impl RequestOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header from raw strings, validating both parts
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, CallError> {
        let name = HeaderName::from_str(name)
            .map_err(|e| CallError::Encode(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CallError::Encode(format!("Invalid header value for {}: {}", name, e)))?;
        Ok(self.header(name, value))
    }
}

/// Options for [`CallAgent::remote_call`]
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: HttpMethod,
    pub content_type: String,
    pub body_type: ResponseBodyType,
    pub overlay: RequestOverlay,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            content_type: APPLICATION_JSON.to_string(),
            body_type: ResponseBodyType::Json,
            overlay: RequestOverlay::default(),
        }
    }
}

/// Successful result of a generic call
pub enum RemoteBody {
    Json(Value),
    Text(String),
    /// Left unconsumed for the caller.
    Stream(BodyStream),
}

impl fmt::Debug for RemoteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            RemoteBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            RemoteBody::Stream(_) => f.write_str("Stream(<stream>)"),
        }
    }
}

/// An agent responsible for remote calls
pub struct CallAgent<T: Transport> {
    transport: T,
    url_prefix: String,
    counter: AtomicU64,
}

impl<T: Transport> CallAgent<T> {
    pub fn new(transport: T, config: &AgentConfig) -> Self {
        let url_prefix = match &config.url_prefix {
            Some(prefix) => format!("{}/", prefix.trim_end_matches('/')),
            None => String::new(),
        };

        Self {
            transport,
            url_prefix,
            counter: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Allocate the next request id
    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop the leading separator and prepend the prefix
    fn resolve_path(&self, path: &str) -> Result<String, CallError> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| CallError::InvalidPath(path.to_string()))?;
        Ok(format!("{}{}", self.url_prefix, rest))
    }

    /// Make a JSON-RPC call to the remote server.
    ///
    /// GET sends the request id as a query parameter and no body; every other
    /// method sends the whole envelope as JSON.
    pub async fn json_rpc_call(
        &self,
        path: &str,
        params: Vec<Option<String>>,
        method: HttpMethod,
        overlay: &RequestOverlay,
    ) -> Result<Value, CallError> {
        let request = JsonRpcRequest::new(self.next_id(), path, params);
        self.send_json_rpc(&request, method, overlay)
            .await
            .inspect_err(|e| warn!(id = request.id, error = %e, "JSON-RPC call failed"))
    }

    async fn send_json_rpc(
        &self,
        request: &JsonRpcRequest,
        method: HttpMethod,
        overlay: &RequestOverlay,
    ) -> Result<Value, CallError> {
        let url = self.resolve_path(&request.url)?;
        let (url, body) = if method == HttpMethod::Get {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("id", &request.id.to_string())
                .finish();
            (with_query(url, &query), None)
        } else {
            let body = serde_json::to_vec(request).map_err(|e| CallError::Encode(e.to_string()))?;
            (url, Some(body))
        };

        debug!(id = request.id, %method, url = %url, "JSON-RPC call");
        let response = self
            .dispatch(method, url, overlay, APPLICATION_JSON, body)
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CallError::Generic(e.message))?;
        decode_response(&body, request.id)
    }

    /// JSON-RPC call with POST and no overlay
    pub async fn json_rpc(&self, path: &str, params: Vec<Option<String>>) -> Result<Value, CallError> {
        self.json_rpc_call(path, params, HttpMethod::Post, &RequestOverlay::default())
            .await
    }

    /// Make a plain remote call to the remote server.
    ///
    /// GET encodes `data` as URL parameters. Other methods encode it as the
    /// body according to `options.content_type`.
    pub async fn remote_call(
        &self,
        path: &str,
        data: Option<&Value>,
        options: &CallOptions,
    ) -> Result<RemoteBody, CallError> {
        self.send_remote(path, data, options)
            .await
            .inspect_err(|e| warn!(path, error = %e, "Remote call failed"))
    }

    async fn send_remote(
        &self,
        path: &str,
        data: Option<&Value>,
        options: &CallOptions,
    ) -> Result<RemoteBody, CallError> {
        let url = self.resolve_path(path)?;
        let (url, body) = if options.method == HttpMethod::Get {
            (with_query(url, &encode_params(data)?), None)
        } else {
            (url, encode_body(data, &options.content_type)?)
        };

        debug!(method = %options.method, url = %url, "Remote call");
        let response = self
            .dispatch(options.method, url, &options.overlay, &options.content_type, body)
            .await?;
        read_body(response, options.body_type).await
    }

    /// Issue exactly one request and classify the HTTP-level outcome
    async fn dispatch(
        &self,
        method: HttpMethod,
        url: String,
        overlay: &RequestOverlay,
        content_type: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, CallError> {
        let mut headers = overlay.headers.clone();
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| CallError::Encode(format!("Invalid content type: {}", e)))?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let request = HttpRequest {
            method: method.into(),
            url,
            headers,
            body,
        };

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| CallError::Generic(e.message))?;

        if response.is_success() {
            Ok(response)
        } else if response.status == HTTP_UNAUTHORIZED {
            Err(CallError::Authorization(response.status_text))
        } else {
            Err(CallError::Transport(response.status_text))
        }
    }
}

fn with_query(url: String, query: &str) -> String {
    if query.is_empty() {
        url
    } else {
        format!("{}?{}", url, query)
    }
}

/// Encode data as `application/x-www-form-urlencoded` pairs.
///
/// Strings are taken as already encoded; object values that are not strings
/// are written as JSON text.
fn encode_params(data: Option<&Value>) -> Result<String, CallError> {
    match data {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.strip_prefix('?').unwrap_or(s).to_string()),
        Some(Value::Object(map)) => {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (key, value) in map {
                match value {
                    Value::String(s) => serializer.append_pair(key, s),
                    other => serializer.append_pair(key, &other.to_string()),
                };
            }
            Ok(serializer.finish())
        }
        Some(other) => Err(CallError::Encode(format!(
            "Cannot encode {} as URL parameters",
            json_kind(other)
        ))),
    }
}

fn encode_body(data: Option<&Value>, content_type: &str) -> Result<Option<Vec<u8>>, CallError> {
    let Some(data) = data else {
        return Ok(None);
    };

    let body = match (content_type, data) {
        (FORM_URLENCODED, _) => encode_params(Some(data))?.into_bytes(),
        (_, Value::String(s)) => s.clone().into_bytes(),
        _ => serde_json::to_vec(data).map_err(|e| CallError::Encode(e.to_string()))?,
    };
    Ok(Some(body))
}

async fn read_body(response: HttpResponse, body_type: ResponseBodyType) -> Result<RemoteBody, CallError> {
    match body_type {
        ResponseBodyType::ReadableStream => Ok(RemoteBody::Stream(response.body)),
        ResponseBodyType::Json => {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CallError::Generic(e.message))?;
            serde_json::from_slice(&bytes)
                .map(RemoteBody::Json)
                .map_err(|e| CallError::Generic(e.to_string()))
        }
        ResponseBodyType::Text => {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CallError::Generic(e.message))?;
            Ok(RemoteBody::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
