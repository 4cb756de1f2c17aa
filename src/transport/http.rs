use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Url};
use tracing::debug;

use super::{HttpRequest, HttpResponse, Transport, TransportFailure};

/// reqwest-backed transport.
///
/// Relative request URLs resolve against `base_url` the way a browser
/// resolves them against the page. The client keeps a cookie store so
/// credentials travel with every request.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self, TransportFailure> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportFailure::new(format!("Invalid base URL {}: {}", base_url, e)))?;
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| TransportFailure::from_error(&e))?;

        Ok(Self {
            client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, url: &str) -> Result<Url, TransportFailure> {
        self.base_url
            .join(url)
            .map_err(|e| TransportFailure::new(format!("Invalid URL {}: {}", url, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let url = self.resolve(&request.url)?;
        debug!(method = %request.method, url = %url, "Dispatching HTTP request");

        let mut builder = self.client.request(request.method, url).headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportFailure::from_error(&e))?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let body = response
            .bytes_stream()
            .map_err(|e| TransportFailure::from_error(&e))
            .boxed();

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned response and hand back the raw request text
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{}/app/", addr), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + content_length
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpTransport::new("not a url").is_err());
    }

    #[test]
    fn test_resolves_relative_to_base() {
        let transport = HttpTransport::new("http://localhost:8080/app/").unwrap();
        let url = transport.resolve("kv/users?id=1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/app/kv/users?id=1");
    }

    #[tokio::test]
    async fn test_post_round_trip() {
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 22\r\nConnection: close\r\n\r\n{\"id\":1,\"result\":\"x\"}\n",
        )
        .await;
        let transport = HttpTransport::new(&base).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let response = transport
            .send(HttpRequest {
                method: Method::POST,
                url: "rpc/users".to_string(),
                headers,
                body: Some(br#"{"id":1}"#.to_vec()),
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        let body = response.bytes().await.unwrap();
        assert_eq!(body, b"{\"id\":1,\"result\":\"x\"}\n");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /app/rpc/users HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"id":1}"#));
    }

    #[tokio::test]
    async fn test_status_text_from_status_code() {
        let (base, server) = serve_once(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let transport = HttpTransport::new(&base).unwrap();

        let response = transport
            .send(HttpRequest {
                method: Method::GET,
                url: "rpc/users?id=3".to_string(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(response.status_text, "Unauthorized");
        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /app/rpc/users?id=3 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&format!("http://{}/", addr)).unwrap();
        let result = transport
            .send(HttpRequest {
                method: Method::GET,
                url: "ping".to_string(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await;

        assert!(result.is_err());
    }
}
