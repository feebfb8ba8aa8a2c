use crate::Gateway;
use breakwater_gateway_core::{Admission, RequestMode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Body, header, Method, Request, Response, StatusCode};
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

/// First path segments owned by the administrative handlers; the proxy
/// route never forwards them.
const RESERVED_PREFIXES: [&str; 3] = ["health", "metrics", "debug"];

/// Per-request pipeline: admission, mode selection, buffered relay with
/// retries, and failure accounting.
pub(crate) async fn proxy<B>(gateway: &Gateway, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: fmt::Display,
{
    let method = req.method().clone();
    let endpoint = req.uri().path().to_string();

    if is_reserved(&endpoint) {
        return text_response(StatusCode::NOT_FOUND, "Not found");
    }
    if !proxied(&method) {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    // Reactive admission.
    let probe = match gateway.breaker().admit() {
        Admission::Allow { probe } => probe,
        Admission::Open => {
            gateway
                .metrics()
                .record_request(&endpoint, method.as_str(), 503);
            return text_response(StatusCode::SERVICE_UNAVAILABLE, "Circuit open");
        }
        Admission::ProbeInFlight => {
            gateway
                .metrics()
                .record_request(&endpoint, method.as_str(), 503);
            return text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Half-open probe in progress",
            );
        }
    };

    // Predictive admission and mode selection.
    let features = gateway.extractor().compute_features();
    let risk = gateway.predictor().predict_risk(&features);
    let mode = RequestMode::from_risk(risk, &gateway.risk_policy());
    if mode == RequestMode::HardFail {
        if probe {
            gateway.breaker().release_probe();
        }
        gateway.breaker().record_short_circuit();
        gateway
            .metrics()
            .record_request(&endpoint, method.as_str(), 429);
        debug!(%endpoint, risk, "Hard-fail mode, rejecting before upstream");
        return text_response(StatusCode::TOO_MANY_REQUESTS, "Service temporarily degraded");
    }

    let upstream = gateway.upstream_settings();
    let timeout = mode.timeout(&upstream);
    let max_retries = if idempotent(&method) {
        mode.retry_budget(&upstream)
    } else {
        0
    };

    let target = match req.uri().path_and_query() {
        Some(pq) => format!("{}{}", gateway.upstream_url(), pq.as_str()),
        None => format!("{}{}", gateway.upstream_url(), endpoint),
    };

    // Hop-by-hop headers are not forwarded.
    let mut headers = req.headers().clone();
    headers.remove(header::HOST);
    headers.remove(header::CONNECTION);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            debug!(%endpoint, %error, "Failed to read request body");
            return text_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    let mut attempts: u32 = 0;
    loop {
        let start = Instant::now();
        let result = gateway
            .client()
            .request(method.clone(), target.as_str())
            .timeout(timeout)
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await;

        let error = match result {
            Ok(response) => {
                let status = response.status();
                let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
                match response.bytes().await {
                    Ok(payload) => {
                        let latency_ms = round2(start.elapsed().as_secs_f64() * 1000.0);
                        gateway.metrics().record_latency(&endpoint, latency_ms);
                        gateway
                            .metrics()
                            .record_request(&endpoint, method.as_str(), status.as_u16());

                        let failure = status.is_server_error();
                        if failure {
                            gateway
                                .metrics()
                                .record_upstream_failure(&endpoint, method.as_str());
                            if attempts < max_retries {
                                backoff(gateway, &endpoint, &method, attempts).await;
                                attempts += 1;
                                continue;
                            }
                        }

                        // Terminal outcome: exactly one window append.
                        gateway.breaker().observe(failure);
                        if failure {
                            gateway.breaker().maybe_open();
                            if probe {
                                gateway.breaker().fail_probe();
                            }
                        }
                        return relay(status, content_type, payload);
                    }
                    Err(error) => error,
                }
            }
            Err(error) => error,
        };

        // Deadline expiry or transport failure.
        gateway.metrics().record_timeout(&endpoint, method.as_str());
        if error.is_timeout() {
            debug!(%endpoint, attempts, "Upstream deadline exceeded");
        } else {
            debug!(%endpoint, attempts, %error, "Upstream transport error");
        }

        if attempts < max_retries {
            backoff(gateway, &endpoint, &method, attempts).await;
            attempts += 1;
            continue;
        }

        gateway.breaker().observe(true);
        gateway.breaker().maybe_open();
        gateway
            .metrics()
            .record_retry_exhausted(&endpoint, method.as_str());
        if probe {
            gateway.breaker().fail_probe();
        }
        gateway
            .metrics()
            .record_request(&endpoint, method.as_str(), 504);
        return text_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timeout");
    }
}

/// Linear back-off before the next attempt.
async fn backoff(gateway: &Gateway, endpoint: &str, method: &Method, attempts: u32) {
    let delay = gateway.upstream_settings().retry_backoff * (attempts + 1);
    tokio::time::sleep(delay).await;
    gateway.metrics().record_retry(endpoint, method.as_str());
}

fn relay(
    status: StatusCode,
    content_type: Option<header::HeaderValue>,
    payload: Bytes,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(Full::new(payload)).unwrap()
}

fn is_reserved(path: &str) -> bool {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    RESERVED_PREFIXES.contains(&first)
}

fn proxied(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}

fn idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

fn round2(value: f64) -> f64 {
    (value * 1e2).round() / 1e2
}

pub(crate) fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}
