use url::Url;

/// Build a websocket URL from a page location and a path.
///
/// Absolute `http(s)://` URLs just swap scheme. Anything else is treated as a
/// path on the page's host; the 8088 dev server proxies to 8080.
pub fn web_socket_url(url: &str, location: &Url) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        return format!("wss://{}", rest);
    }
    if let Some(rest) = url.strip_prefix("http://") {
        return format!("ws://{}", rest);
    }

    let scheme = if location.scheme() == "https" { "wss" } else { "ws" };
    let port = match location.port() {
        Some(8088) => ":8080".to_string(),
        Some(0) | None => String::new(),
        Some(port) => format!(":{}", port),
    };
    let host = location.host_str().unwrap_or_default();

    format!("{}://{}{}/{}", scheme, host, port, url)
}
