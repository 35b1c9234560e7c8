use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::Response;
use portico_core::error::ProxyError;
use tracing::debug;

/// Connection-scoped headers that must not be relayed.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Streams requests to a backend origin and responses back out.
///
/// Method, path, query, and end-to-end headers are preserved; the upstream
/// Host comes from the backend URL. The client's address is appended to
/// `X-Forwarded-For`. Bodies are streamed in both directions, never
/// buffered whole.
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn forward(
        &self,
        backend_url: &str,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        client_ip: &str,
        body: Body,
    ) -> Result<Response, ProxyError> {
        let target = build_target_url(backend_url, uri);
        debug!(target = %target, method = %method, "Forwarding to upstream");

        let mut builder = self.client.request(method, &target);
        for (name, value) in headers {
            if is_hop_by_hop(name) || name.as_str() == "host" || name.as_str() == "x-forwarded-for"
            {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder = builder.header("x-forwarded-for", forwarded_for(headers, client_ip));

        // Only attach a body when the client sent one; a streamed body on a
        // bodiless GET would force chunked framing onto the upstream.
        let has_body = headers.contains_key(header::CONTENT_LENGTH)
            || headers.contains_key(header::TRANSFER_ENCODING);
        if has_body {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = upstream.status();
        let mut response = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                response = response.header(name, value);
            }
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ProxyError::Upstream(e.to_string()))
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// `http://origin` + request path + query.
fn build_target_url(backend_url: &str, uri: &Uri) -> String {
    let base = backend_url.trim_end_matches('/');
    let path = uri.path();
    match uri.query() {
        Some(query) => format!("{base}{path}?{query}"),
        None => format!("{base}{path}"),
    }
}

/// Existing X-Forwarded-For chain with the connecting client appended.
fn forwarded_for(headers: &HeaderMap, client_ip: &str) -> String {
    match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) if !existing.is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip.to_string(),
    }
}

/// Synthesize the 502 response for an unreachable upstream.
pub fn bad_gateway() -> Response {
    plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway".into())
}

/// A plain-text response with the given status.
pub fn plain_response(status: StatusCode, body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_preserves_path_and_query() {
        let uri: Uri = "/api/users?page=2&sort=asc".parse().unwrap();
        assert_eq!(
            build_target_url("http://10.0.0.1:8080", &uri),
            "http://10.0.0.1:8080/api/users?page=2&sort=asc"
        );
    }

    #[test]
    fn target_url_tolerates_trailing_slash_on_backend() {
        let uri: Uri = "/ping".parse().unwrap();
        assert_eq!(
            build_target_url("http://u1.test/", &uri),
            "http://u1.test/ping"
        );
    }

    #[test]
    fn forwarded_for_appends_to_existing_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(forwarded_for(&headers, "192.0.2.5"), "203.0.113.9, 192.0.2.5");
    }

    #[test]
    fn forwarded_for_starts_a_chain_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers, "192.0.2.5"), "192.0.2.5");
    }

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
        assert!(!is_hop_by_hop(&header::USER_AGENT));
    }
}
