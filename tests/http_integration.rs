//! Integration tests against local HTTP servers standing in for the
//! geolocation providers and the notification backend.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use visitor_beacon::notify::{DownloadPayload, NotifyError, Notifier, PageContext, VisitPayload};
use visitor_beacon::report::{report_download, report_visit};
use visitor_beacon::stats::StatsStore;
use visitor_beacon::visitor::{
    FanOut, ProviderDescriptor, ResolverConfig, VisitorInfo, VisitorInfoResolver,
};

type Captured = Arc<Mutex<Vec<(String, Value)>>>;

/// Run `router` on an ephemeral port in a background runtime.
fn serve(router: Router) -> String {
    let (tx, rx) = mpsc::channel::<SocketAddr>();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, router).await.unwrap();
        });
    });
    format!("http://{}", rx.recv().unwrap())
}

fn fake_providers() -> String {
    let router = Router::new()
        .route(
            "/ipapi/json/",
            get(|| async { Json(json!({ "ip": "1.2.3.4", "city": "unknown", "country": "TR" })) }),
        )
        .route(
            "/ip-api/json/",
            get(|| async {
                Json(json!({
                    "status": "success",
                    "query": "1.2.3.4",
                    "city": "Istanbul",
                    "country": "Turkey",
                    "regionName": "Marmara",
                    "lat": 41.0082,
                    "lon": 28.9784
                }))
            }),
        )
        .route("/ipinfo/json", get(|| async { Json(json!({ "ip": "5.6.7.8" })) }))
        .route(
            "/limited",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        )
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "oops") }),
        )
        .route("/garbage", get(|| async { "<html>not json</html>" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({ "ip": "8.8.8.8", "city": "Too Late" }))
            }),
        )
        .route(
            "/echo-agent",
            get(|headers: HeaderMap| async move {
                let ua = headers
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                Json(json!({ "ip": "9.9.9.9", "org": ua }))
            }),
        );
    serve(router)
}

fn resolver(base: &str, paths: &[&str], fan_out: FanOut) -> VisitorInfoResolver {
    let config = ResolverConfig {
        providers: paths
            .iter()
            .map(|p| ProviderDescriptor::new(*p, format!("{}{}", base, p)))
            .collect(),
        provider_timeout: Duration::from_millis(500),
        total_budget: Duration::from_secs(5),
        fan_out,
    };
    VisitorInfoResolver::new(config, "beacon-test/1.0")
}

#[test]
fn test_city_from_second_provider_wins() {
    let base = fake_providers();
    let info = resolver(&base, &["/ipapi/json/", "/ip-api/json/", "/ipinfo/json"], FanOut::Sequential)
        .resolve();

    assert_eq!(info.city, "Istanbul");
    assert_eq!(info.region, "Marmara");
    assert_eq!(info.country, "Turkey");
    assert_eq!(info.ip, "1.2.3.4");
    assert!((info.latitude.unwrap() - 41.0082).abs() < 1e-9);
}

#[test]
fn test_only_last_provider_succeeds() {
    let base = fake_providers();
    let info = resolver(&base, &["/limited", "/garbage", "/ipinfo/json"], FanOut::Sequential)
        .resolve();

    assert_eq!(
        info,
        VisitorInfo {
            ip: "5.6.7.8".into(),
            ..VisitorInfo::unknown()
        }
    );
}

#[test]
fn test_every_provider_fails() {
    let base = fake_providers();
    let mut r = resolver(&base, &["/limited", "/broken", "/garbage"], FanOut::Sequential);
    assert!(r.resolve().is_unknown());

    // Nothing listening on the discard port
    let config = ResolverConfig {
        providers: vec![ProviderDescriptor::new("refused", "http://127.0.0.1:9/json")],
        ..r.config().clone()
    };
    r = VisitorInfoResolver::new(config, "beacon-test/1.0");
    assert!(r.resolve().is_unknown());
}

#[test]
fn test_slow_provider_is_skipped() {
    let base = fake_providers();
    let start = Instant::now();
    let info = resolver(&base, &["/slow", "/ip-api/json/"], FanOut::Sequential).resolve();

    assert_eq!(info.city, "Istanbul");
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_parallel_matches_sequential() {
    let base = fake_providers();
    let paths = ["/limited", "/ipapi/json/", "/slow", "/ip-api/json/", "/ipinfo/json"];

    let start = Instant::now();
    let parallel = resolver(&base, &paths, FanOut::Parallel).resolve();
    assert!(start.elapsed() < Duration::from_secs(2));

    let sequential = resolver(&base, &paths, FanOut::Sequential).resolve();
    assert_eq!(parallel, sequential);
    assert_eq!(parallel.city, "Istanbul");
}

#[test]
fn test_user_agent_is_sent() {
    let base = fake_providers();
    let info = resolver(&base, &["/echo-agent"], FanOut::Sequential).resolve();
    assert_eq!(info.org, "beacon-test/1.0");
}

// ─── Notifier ───────────────────────────────────────────────────

async fn capture_visit(State(seen): State<Captured>, Json(body): Json<Value>) -> StatusCode {
    seen.lock().unwrap().push(("visit".into(), body));
    StatusCode::NO_CONTENT
}

async fn capture_download(State(seen): State<Captured>, Json(body): Json<Value>) -> StatusCode {
    seen.lock().unwrap().push(("download".into(), body));
    StatusCode::OK
}

fn fake_backend() -> (String, Captured) {
    let seen: Captured = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/api/notify-visit", post(capture_visit))
        .route("/api/notify-download", post(capture_download))
        .with_state(seen.clone());
    (serve(router), seen)
}

fn page() -> PageContext {
    PageContext {
        url: "https://example.com/".into(),
        referrer: None,
        language: "tr-TR".into(),
        user_agent: "Mozilla/5.0".into(),
    }
}

#[test]
fn test_visit_notification_delivered() {
    let (base, seen) = fake_backend();
    let notifier = Notifier::new(&format!("{}/", base), Duration::from_secs(2), "beacon-test/1.0");

    let visitor = VisitorInfo {
        ip: "1.2.3.4".into(),
        city: "Istanbul".into(),
        ..VisitorInfo::unknown()
    };
    notifier
        .notify_visit(&VisitPayload::new(visitor, &page()))
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (kind, body) = &seen[0];
    assert_eq!(kind, "visit");
    assert_eq!(body["city"], "Istanbul");
    assert_eq!(body["referrer"], "direct");
    assert_eq!(body["userAgent"], "Mozilla/5.0");
    assert!(body["latitude"].is_null());
}

#[test]
fn test_download_notification_delivered() {
    let (base, seen) = fake_backend();
    let notifier = Notifier::new(&base, Duration::from_secs(2), "beacon-test/1.0");

    notifier
        .notify_download(&DownloadPayload::new(VisitorInfo::unknown(), &page()))
        .unwrap();

    let seen = seen.lock().unwrap();
    let (kind, body) = &seen[0];
    assert_eq!(kind, "download");
    assert_eq!(body["ip"], "unknown");
    assert!(body.get("referrer").is_none());
}

#[test]
fn test_notification_errors_are_reported() {
    let base = fake_providers();
    // The provider server has no notify routes
    let notifier = Notifier::new(&base, Duration::from_secs(2), "beacon-test/1.0");
    let err = notifier
        .notify_visit(&VisitPayload::new(VisitorInfo::unknown(), &page()))
        .unwrap_err();
    assert!(matches!(err, NotifyError::Status(404)));

    let offline = Notifier::new("http://127.0.0.1:9", Duration::from_secs(2), "beacon-test/1.0");
    let err = offline
        .notify_download(&DownloadPayload::new(VisitorInfo::unknown(), &page()))
        .unwrap_err();
    assert!(matches!(err, NotifyError::Network(_)));
}

#[test]
fn test_visit_counted_when_backend_is_down() {
    let base = fake_providers();
    let dir = tempfile::TempDir::new().unwrap();
    let mut stats = StatsStore::load_from(dir.path().join("stats.json"));
    let resolver = resolver(&base, &["/ipapi/json/", "/ip-api/json/"], FanOut::Sequential);
    let offline = Notifier::new("http://127.0.0.1:9", Duration::from_secs(2), "beacon-test/1.0");

    let report = report_visit(&resolver, &mut stats, Some(&offline), &page()).unwrap();
    assert!(!report.delivered);
    assert_eq!(report.payload.visitor.city, "Istanbul");

    let s = stats.snapshot();
    assert_eq!(s.total_visits, 1);
    assert_eq!(s.unique_visitors, 1);
}

#[test]
fn test_download_reported_and_delivered() {
    let base = fake_providers();
    let (backend, seen) = fake_backend();
    let dir = tempfile::TempDir::new().unwrap();
    let mut stats = StatsStore::load_from(dir.path().join("stats.json"));
    let resolver = resolver(&base, &["/ip-api/json/"], FanOut::Sequential);
    let notifier = Notifier::new(&backend, Duration::from_secs(2), "beacon-test/1.0");

    let report = report_download(&resolver, &mut stats, Some(&notifier), &page()).unwrap();
    assert!(report.delivered);
    assert_eq!(stats.snapshot().total_downloads, 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "download");
    assert_eq!(seen[0].1["city"], "Istanbul");

    // Without a notifier nothing is sent but the event still counts
    drop(seen);
    let report = report_download(&resolver, &mut stats, None, &page()).unwrap();
    assert!(!report.delivered);
    assert_eq!(stats.snapshot().total_downloads, 2);
}
