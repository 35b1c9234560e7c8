use crate::data_plane::DataPlane;
use crate::filter::Decision;
use crate::forward::{bad_gateway, plain_response};
use crate::limiter::RateDecision;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use portico_core::error::ProxyError;
use portico_core::model::{FilterLogEntry, RequestLogEntry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// URL prefix reserved for the control plane; the limiter never applies.
const ADMIN_PREFIX: &str = "/admin";

/// The proxy listener: every method and path lands in [`handle`].
pub fn proxy_router(data_plane: Arc<DataPlane>) -> Router {
    Router::new().fallback(handle).with_state(data_plane)
}

/// The data-plane request pipeline: filters → rate limit → routing →
/// selection → forward, with an outcome record for every path out.
async fn handle(
    State(dp): State<Arc<DataPlane>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let host = request_host(&req);
    let path = req.uri().path().to_string();
    let client_ip = client_ip(req.headers(), peer);
    let user_agent = header_string(req.headers(), header::USER_AGENT);

    // 1. Filter evaluation. A match short-circuits with a synthesized
    //    response and a filter-log entry; nothing is forwarded.
    match dp.filters.evaluate(&client_ip, &host, &path) {
        Decision::Pass => {}
        Decision::Filtered {
            rule,
            status,
            body,
            redirect_url,
        } => {
            dp.sink.submit_filter(FilterLogEntry {
                timestamp: Utc::now(),
                client_ip,
                host,
                path,
                user_agent,
                filter_id: rule.id,
                match_kind: rule.match_kind,
                match_value: rule.match_value.clone(),
                action_kind: rule.action_kind,
                status_code: status,
            });

            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
            return match redirect_url {
                Some(location) => {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = status;
                    match location.parse() {
                        Ok(value) => {
                            response.headers_mut().insert(header::LOCATION, value);
                        }
                        Err(_) => {
                            warn!(location = %location, "Unusable redirect target in filter rule");
                        }
                    }
                    response
                }
                None => plain_response(status, body),
            };
        }
    }

    // 2. Rate limiting, skipped for the reserved admin prefix.
    if !path.starts_with(ADMIN_PREFIX)
        && dp.limiter.check(&client_ip, &host, Instant::now()) == RateDecision::Limited
    {
        dp.sink.submit_request(RequestLogEntry {
            timestamp: Utc::now(),
            client_ip: client_ip.clone(),
            host: host.clone(),
            path: path.clone(),
            backend_id: 0,
            latency_ms: 0,
            status_code: ProxyError::RateLimited.status_code(),
            is_success: false,
            user_agent,
            filter_id: 0,
        });
        return plain_response(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Rate limit exceeded for host {host}. Please try again later."),
        );
    }

    // 3. Routing lookup.
    let backends = match dp.routing.lookup(&host) {
        Some(backends) => backends,
        None => {
            let err = ProxyError::NoRoute(host.clone());
            dp.sink.submit_request(RequestLogEntry {
                timestamp: Utc::now(),
                client_ip: client_ip.clone(),
                host: host.clone(),
                path: path.clone(),
                backend_id: 0,
                latency_ms: 0,
                status_code: err.status_code(),
                is_success: false,
                user_agent,
                filter_id: 0,
            });
            return plain_response(
                StatusCode::GONE,
                format!("No backends found for this hostname {host}"),
            );
        }
    };

    // 4. Selection and forward. The list is non-empty by construction.
    let backend = match dp.selector.select(&backends) {
        Some(backend) => backend,
        None => return bad_gateway(),
    };
    let backend_id = backend.id;
    let backend_url = backend.url.clone();

    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let body = req.into_body();

    match dp
        .forwarder
        .forward(&backend_url, method, &uri, &headers, &client_ip, body)
        .await
    {
        Ok(response) => {
            dp.sink.submit_request(RequestLogEntry {
                timestamp: Utc::now(),
                client_ip,
                host,
                path,
                backend_id,
                latency_ms: started.elapsed().as_millis() as i64,
                status_code: response.status().as_u16(),
                is_success: true,
                user_agent,
                filter_id: 0,
            });
            response
        }
        Err(e) => {
            warn!(backend = %backend_url, error = %e, "Upstream forward failed");
            dp.sink.submit_request(RequestLogEntry {
                timestamp: Utc::now(),
                client_ip,
                host,
                path,
                backend_id,
                latency_ms: started.elapsed().as_millis() as i64,
                status_code: e.status_code(),
                is_success: false,
                user_agent,
                filter_id: 0,
            });
            bad_gateway()
        }
    }
}

/// The request's Host, from the Host header or the URI authority.
fn request_host(req: &Request) -> String {
    if let Some(host) = req.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
        return host.to_string();
    }
    req.uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default()
}

/// Best-available client IP: first X-Forwarded-For entry, then X-Real-IP,
/// then the peer address with the port dropped.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// A header value as an owned string, empty when absent.
fn header_string(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
