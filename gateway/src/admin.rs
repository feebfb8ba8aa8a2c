use crate::proxy::text_response;
use crate::Gateway;
use breakwater_gateway_core::RequestMode;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Method, Request, Response, StatusCode};
use prometheus_client::encoding::text;
use tracing::error;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Serves the administrative surface. Returns None for paths owned by the
/// proxy route.
pub(crate) fn respond<B>(gateway: &Gateway, req: &Request<B>) -> Option<Response<Full<Bytes>>> {
    let handler: fn(&Gateway) -> Response<Full<Bytes>> = match req.uri().path() {
        "/health" => health,
        "/metrics" => scrape,
        "/debug/features" => debug_features,
        "/debug/risk" => debug_risk,
        "/debug/mode" => debug_mode,
        _ => return None,
    };

    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return Some(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }
    Some(handler(gateway))
}

fn health(_gateway: &Gateway) -> Response<Full<Bytes>> {
    json_response(serde_json::json!({"status": "ok"}))
}

fn scrape(gateway: &Gateway) -> Response<Full<Bytes>> {
    let mut buf = String::new();
    if let Err(error) = text::encode(&mut buf, gateway.registry()) {
        error!(%error, "Failed to encode metrics");
        return text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        );
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)
        .body(Full::new(Bytes::from(buf)))
        .unwrap()
}

fn debug_features(gateway: &Gateway) -> Response<Full<Bytes>> {
    json_response(serde_json::json!(gateway.extractor().compute_features()))
}

fn debug_risk(gateway: &Gateway) -> Response<Full<Bytes>> {
    let features = gateway.extractor().compute_features();
    let risk = gateway.predictor().predict_risk(&features);
    let threshold = gateway.thresholds().compute(&features);
    json_response(serde_json::json!({
        "risk": risk,
        "adaptive_threshold": threshold,
        "features": features,
    }))
}

fn debug_mode(gateway: &Gateway) -> Response<Full<Bytes>> {
    let features = gateway.extractor().compute_features();
    let risk = gateway.predictor().predict_risk(&features);
    let mode = RequestMode::from_risk(risk, &gateway.risk_policy());
    json_response(serde_json::json!({
        "risk": risk,
        "mode": mode.as_str(),
        "features": features,
    }))
}

fn json_response(value: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(value.to_string())))
        .unwrap()
}
