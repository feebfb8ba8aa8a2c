//! End-to-end scenarios against a deterministic stub upstream.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breakwater_gateway::{Gateway, GatewayConfig, PredictiveSettings};
use breakwater_gateway_core::{BreakerSettings, CircuitState, UpstreamSettings};
use breakwater_gateway_telemetry::LoggerSettings;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

#[derive(Copy, Clone)]
enum Behavior {
    Ok,
    ServerError,
    SlowOk(u64),
    Echo,
}

/// Stub origin on an ephemeral port; counts every request it receives.
async fn spawn_upstream(behavior: Behavior) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let response = match behavior {
                            Behavior::Ok => upstream_response(StatusCode::OK, "upstream ok".into()),
                            Behavior::ServerError => upstream_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "upstream boom".into(),
                            ),
                            Behavior::SlowOk(delay_ms) => {
                                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                upstream_response(StatusCode::OK, "slow ok".into())
                            }
                            Behavior::Echo => {
                                let (parts, body) = req.into_parts();
                                let payload = body.collect().await.unwrap().to_bytes();
                                upstream_response(
                                    StatusCode::OK,
                                    format!(
                                        "{} {} {}",
                                        parts.method,
                                        parts.uri,
                                        String::from_utf8_lossy(&payload)
                                    ),
                                )
                            }
                        };
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    (format!("http://{addr}"), hits)
}

fn upstream_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Defaults with timing tightened for tests.
fn test_config(upstream: &str) -> GatewayConfig {
    let mut config = GatewayConfig::new(upstream);
    config.breaker = BreakerSettings {
        open_duration: Duration::from_millis(200),
        ..Default::default()
    };
    config.upstream = UpstreamSettings {
        timeout: Duration::from_millis(500),
        degraded_timeout: Duration::from_millis(200),
        max_retries: 2,
        retry_backoff: Duration::from_millis(10),
    };
    config
}

fn request(method: Method, path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Full::default())
        .unwrap()
}

fn get(path: &str) -> Request<Full<Bytes>> {
    request(Method::GET, path)
}

async fn body_text(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Zero-coefficient logistic artifact: every non-empty feature vector
/// scores sigmoid(intercept).
fn write_model(dir: &tempfile::TempDir, intercept: f64) -> std::path::PathBuf {
    let path = dir.path().join("model.json");
    std::fs::write(
        &path,
        format!(r#"{{"feature_names": [], "coefficients": [], "intercept": {intercept}}}"#),
    )
    .unwrap();
    path
}

#[tokio::test]
async fn reactive_trip_opens_after_the_failure_window() {
    let (upstream, hits) = spawn_upstream(Behavior::ServerError).await;
    let mut config = test_config(&upstream);
    config.upstream.max_retries = 0;
    let gateway = Gateway::new(config).unwrap();

    for _ in 0..10 {
        let response = gateway.handle(get("/api/orders")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 10);
    assert_eq!(gateway.breaker().state(), CircuitState::Open);
    assert_eq!(gateway.breaker().opened_total(), 1);

    let response = gateway.handle(get("/api/orders")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "Circuit open");
    assert_eq!(hits.load(Ordering::SeqCst), 10);
    assert_eq!(gateway.breaker().short_circuited_total(), 1);
}

#[tokio::test]
async fn recovery_admits_one_probe_then_closes() {
    let (upstream, hits) = spawn_upstream(Behavior::SlowOk(100)).await;
    let gateway = Gateway::new(test_config(&upstream)).unwrap();

    assert!(gateway.breaker().predictive_open());
    tokio::time::sleep(Duration::from_millis(250)).await;

    let probe = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.handle(get("/api/orders")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let rejected = gateway.handle(get("/api/orders")).await;
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(rejected).await, "Half-open probe in progress");

    let probed = probe.await.unwrap();
    assert_eq!(probed.status(), StatusCode::OK);
    assert_eq!(gateway.breaker().state(), CircuitState::Closed);
    assert_eq!(gateway.breaker().window_len(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let after = gateway.handle(get("/api/orders")).await;
    assert_eq!(after.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn predictive_controller_opens_the_breaker() {
    let (upstream, _hits) = spawn_upstream(Behavior::Ok).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&upstream);
    config.model_path = Some(write_model(&dir, 3.0));
    config.extractor.sample_interval = Duration::from_millis(20);
    let gateway = Gateway::new(config).unwrap();

    let (close, watch) = drain::channel();
    gateway
        .spawn_background(
            LoggerSettings {
                output_path: dir.path().join("features.csv"),
                ..Default::default()
            },
            PredictiveSettings {
                check_interval: Duration::from_millis(50),
                cooldown: Duration::from_secs(30),
            },
            watch,
        )
        .unwrap();

    let warm = gateway.handle(get("/api/orders")).await;
    assert_eq!(warm.status(), StatusCode::OK);

    let mut opened = false;
    for _ in 0..100 {
        if gateway.breaker().state() == CircuitState::Open {
            opened = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(opened, "predictive controller never opened the breaker");
    assert_eq!(gateway.breaker().opened_total(), 1);

    let rejected = gateway.handle(get("/api/orders")).await;
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    drop(close);
}

#[tokio::test]
async fn degraded_mode_shortens_the_deadline_without_retry() {
    let (upstream, hits) = spawn_upstream(Behavior::SlowOk(400)).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&upstream);
    config.upstream.timeout = Duration::from_millis(800);
    // sigmoid(0) = 0.5: degraded, below the hard cutoff.
    config.model_path = Some(write_model(&dir, 0.0));
    let gateway = Gateway::new(config).unwrap();

    gateway.extractor().sample();
    let warm = gateway.handle(get("/api/slow")).await;
    assert_eq!(warm.status(), StatusCode::OK);
    gateway.extractor().sample();

    let start = std::time::Instant::now();
    let response = gateway.handle(get("/api/slow")).await;
    let elapsed = start.elapsed();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_text(response).await, "Upstream timeout");
    assert!(
        elapsed < Duration::from_millis(390),
        "deadline was not shortened: {elapsed:?}"
    );

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.metrics().retries_total(), 0.0);
}

#[tokio::test]
async fn hard_fail_rejects_before_upstream() {
    let (upstream, hits) = spawn_upstream(Behavior::Ok).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&upstream);
    // sigmoid(2.2) = 0.90, above the hard cutoff.
    config.model_path = Some(write_model(&dir, 2.2));
    let gateway = Gateway::new(config).unwrap();

    gateway.extractor().sample();
    let warm = gateway.handle(get("/api/orders")).await;
    assert_eq!(warm.status(), StatusCode::OK);
    gateway.extractor().sample();

    let window_before = gateway.breaker().window_len();
    let short_circuited_before = gateway.breaker().short_circuited_total();

    let response = gateway.handle(get("/api/orders")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_text(response).await, "Service temporarily degraded");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        gateway.breaker().short_circuited_total(),
        short_circuited_before + 1
    );
    assert_eq!(gateway.breaker().window_len(), window_before);
}

#[tokio::test]
async fn non_idempotent_methods_are_never_retried() {
    let (upstream, hits) = spawn_upstream(Behavior::ServerError).await;
    let gateway = Gateway::new(test_config(&upstream)).unwrap();

    let response = gateway.handle(request(Method::POST, "/api/submit")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.metrics().retries_total(), 0.0);

    let response = gateway.handle(get("/api/submit")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(body_text(response).await, "upstream boom");
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert_eq!(gateway.metrics().retries_total(), 2.0);
}

#[tokio::test]
async fn forwards_method_path_query_and_body() {
    let (upstream, _hits) = spawn_upstream(Behavior::Echo).await;
    let gateway = Gateway::new(test_config(&upstream)).unwrap();

    let forwarded = Request::builder()
        .method(Method::POST)
        .uri("/api/orders?limit=5")
        .body(Full::new(Bytes::from("order payload")))
        .unwrap();
    let response = gateway.handle(forwarded).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "POST /api/orders?limit=5 order payload"
    );
}

#[tokio::test]
async fn admin_surface_serves_health_metrics_and_debug() {
    let (upstream, _hits) = spawn_upstream(Behavior::Ok).await;
    let gateway = Gateway::new(test_config(&upstream)).unwrap();

    let health = gateway.handle(get("/health")).await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body_text(health).await, r#"{"status":"ok"}"#);

    let proxied = gateway.handle(get("/api/orders")).await;
    assert_eq!(proxied.status(), StatusCode::OK);

    let scrape = gateway.handle(get("/metrics")).await;
    assert_eq!(scrape.status(), StatusCode::OK);
    let exposition = body_text(scrape).await;
    assert!(exposition.contains("api_requests_total"));
    assert!(exposition.contains("circuit_state"));

    let features = gateway.handle(get("/debug/features")).await;
    assert_eq!(body_text(features).await, "{}");

    let mode = gateway.handle(get("/debug/mode")).await;
    let value: serde_json::Value = serde_json::from_str(&body_text(mode).await).unwrap();
    assert_eq!(value["mode"], "NORMAL");
    assert_eq!(value["risk"], 0.0);

    let risk = gateway.handle(get("/debug/risk")).await;
    let value: serde_json::Value = serde_json::from_str(&body_text(risk).await).unwrap();
    assert_eq!(value["adaptive_threshold"], 0.7);

    let reserved = gateway.handle(get("/debug/anything")).await;
    assert_eq!(reserved.status(), StatusCode::NOT_FOUND);

    let post_health = gateway.handle(request(Method::POST, "/health")).await;
    assert_eq!(post_health.status(), StatusCode::METHOD_NOT_ALLOWED);
}
