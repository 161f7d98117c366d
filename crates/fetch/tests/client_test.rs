//! CachedFetchClient behaviour against a scripted transport

mod common;

use async_trait::async_trait;
use bus::events::names;
use bus::{DashboardEvent, EventBus};
use common::{MockReply, MockTransport};
use fetch::{
    ApiError, CachedFetchClient, ClientConfig, CurrentUser, ErrorKind, FormPart, RequestBody,
    RequestOptions, ResponseData, SessionStore, TokenRefresher,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const TTL: Duration = Duration::from_secs(60);

fn config() -> ClientConfig {
    ClientConfig::default().with_cache_ttl(TTL)
}

fn client_with(transport: Arc<MockTransport>) -> CachedFetchClient {
    CachedFetchClient::builder(config())
        .transport(transport)
        .build()
}

fn signed_in(token: &str) -> Arc<SessionStore> {
    let store = Arc::new(SessionStore::new());
    store.login(CurrentUser {
        id: "u-3".to_string(),
        name: "Robin".to_string(),
        role: "charge_nurse".to_string(),
        token: Some(token.to_string()),
    });
    store
}

fn record_events(bus: &EventBus<DashboardEvent>, name: &str) -> Arc<Mutex<Vec<DashboardEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(name, move |e: &DashboardEvent| sink.lock().unwrap().push(e.clone()))
        .unwrap();
    seen
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_network_call() {
    let transport = MockTransport::always(
        MockReply::json(200, json!([{ "id": 1, "name": "A. Jones" }]))
            .delayed(Duration::from_millis(100)),
    );
    let client = client_with(transport.clone());

    let (a, b) = tokio::join!(client.get("residents"), client.get("residents"));

    assert_eq!(transport.calls(), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_are_shared_and_reported_once() {
    let transport = MockTransport::always(
        MockReply::json(500, json!({ "message": "database offline" }))
            .delayed(Duration::from_millis(50)),
    );
    let bus = EventBus::<DashboardEvent>::new();
    let errors = record_events(&bus, names::API_ERROR);
    let client = CachedFetchClient::builder(config())
        .transport(transport.clone())
        .failure_sink(Arc::new(bus.clone()))
        .build();

    let (a, b) = tokio::join!(client.get("census"), client.get("census"));

    assert_eq!(transport.calls(), 1);
    assert_eq!(a.unwrap_err(), b.unwrap_err());
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_bodies_are_not_coalesced() {
    let transport =
        MockTransport::always(MockReply::json(200, json!({})).delayed(Duration::from_millis(10)));
    let client = client_with(transport.clone());

    let body_a = json!({ "text": "a" });
    let body_b = json!({ "text": "b" });
    let (a, b) = tokio::join!(
        client.post("notes", &body_a),
        client.post("notes", &body_b)
    );

    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cached_get_served_until_ttl_elapses() {
    let transport = MockTransport::always(MockReply::json(200, json!({ "beds": 40 })));
    let client = client_with(transport.clone());

    client.get("facility").await.unwrap();
    assert_eq!(transport.calls(), 1);

    tokio::time::advance(TTL).await;
    client.get("facility").await.unwrap();
    assert_eq!(transport.calls(), 1, "exactly-at-TTL is still cached");

    tokio::time::advance(Duration::from_millis(1)).await;
    client.get("facility").await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_mutations_are_not_cached() {
    let transport = MockTransport::always(MockReply::json(201, json!({ "ok": true })));
    let client = client_with(transport.clone());

    client.post("incidents", &json!({ "room": "B2" })).await.unwrap();
    client.post("incidents", &json!({ "room": "B2" })).await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(client.cached_entries(), 0);
}

#[tokio::test]
async fn test_clear_cache_forces_network_call() {
    let transport = MockTransport::always(MockReply::json(200, json!([])));
    let client = client_with(transport.clone());

    client.get("inventory").await.unwrap();
    client.get("inventory").await.unwrap();
    assert_eq!(transport.calls(), 1);

    client.clear_cache();
    client.get("inventory").await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_status_taxonomy() {
    let transport = MockTransport::new(|request| match request.url.path() {
        "/api/v1/missing" => MockReply::json(404, json!({ "message": "No such resident" })),
        "/api/v1/busy" => MockReply::json(429, json!({})).header("retry-after", "30"),
        "/api/v1/locked" => MockReply::json(403, json!({ "message": "Admins only" })),
        _ => MockReply::json(500, json!({ "message": "boom", "trace": "abc" })),
    });
    let client = client_with(transport);

    let not_found = client.get("missing").await.unwrap_err();
    let limited = client.get("busy").await.unwrap_err();
    let forbidden = client.get("locked").await.unwrap_err();
    let server = client.get("broken").await.unwrap_err();

    assert_eq!(
        not_found,
        ApiError::NotFound {
            message: "No such resident".to_string(),
            details: Some(json!({ "message": "No such resident" })),
        }
    );
    assert_eq!(
        limited,
        ApiError::RateLimited {
            message: "Too Many Requests".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        }
    );
    assert_eq!(forbidden.kind(), ErrorKind::Forbidden);
    assert_eq!(server.kind(), ErrorKind::Api);
    assert_eq!(server.status(), 500);
    assert_eq!(server.details().unwrap()["trace"], json!("abc"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_rejects_and_never_resolves_later() {
    let transport = MockTransport::always(
        MockReply::json(200, json!({ "late": true })).delayed(Duration::from_secs(5)),
    );
    let client = CachedFetchClient::builder(config().with_timeout(Duration::from_secs(1)))
        .transport(transport.clone())
        .build();

    let err = client.get("slow").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Timeout {
            after: Duration::from_secs(1)
        }
    );
    assert!(err.is_timeout());
    assert_eq!(client.in_flight(), 0);

    // The mock would have answered at 5s; the dropped call must not land in the cache
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(client.cached_entries(), 0);
}

#[tokio::test]
async fn test_network_failure_kind() {
    let transport = MockTransport::always(MockReply::network_error("connection refused"));
    let client = client_with(transport);

    let err = client.get("residents").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.status(), 0);
}

#[tokio::test]
async fn test_default_and_bearer_headers() {
    let transport = MockTransport::always(MockReply::json(200, json!({})));
    let client = CachedFetchClient::builder(config())
        .transport(transport.clone())
        .token_provider(signed_in("abc123"))
        .build();

    client.get("residents/7").await.unwrap();

    let request = transport.last_request();
    assert_eq!(request.url.as_str(), "http://localhost:3000/api/v1/residents/7");
    assert_eq!(request.headers[CONTENT_TYPE], "application/json");
    assert_eq!(request.headers[ACCEPT], "application/json");
    assert_eq!(request.headers[AUTHORIZATION], "Bearer abc123");
}

#[tokio::test]
async fn test_no_authorization_when_signed_out() {
    let transport = MockTransport::always(MockReply::json(200, json!({})));
    let client = CachedFetchClient::builder(config())
        .transport(transport.clone())
        .token_provider(Arc::new(SessionStore::new()))
        .build();

    client.get("public/menu").await.unwrap();
    assert!(transport.last_request().headers.get(AUTHORIZATION).is_none());
}

#[tokio::test]
async fn test_caller_headers_override_defaults() {
    let transport = MockTransport::always(MockReply::bytes(200, "text/csv", b"a,b\n1,2\n"));
    let client = client_with(transport.clone());

    let options = RequestOptions::new(Method::GET)
        .header(ACCEPT, reqwest::header::HeaderValue::from_static("text/csv"));
    let data = client.request("reports/census.csv", options).await.unwrap();

    assert_eq!(data, ResponseData::Text("a,b\n1,2\n".to_string()));
    assert_eq!(transport.last_request().headers[ACCEPT], "text/csv");
}

struct StoreRefresher {
    store: Arc<SessionStore>,
    calls: AtomicUsize,
    succeed: bool,
}

#[async_trait]
impl TokenRefresher for StoreRefresher {
    async fn refresh_token(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            self.store.set_token(Some("renewed".to_string()));
            Ok(())
        } else {
            Err(ApiError::Unauthorized {
                message: "refresh rejected".to_string(),
            })
        }
    }
}

fn auth_gate() -> Arc<MockTransport> {
    MockTransport::new(|request| {
        let auth = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if auth == Some("Bearer renewed") {
            MockReply::json(200, json!({ "shift": "night" }))
        } else {
            MockReply::json(401, json!({ "message": "Token expired" }))
        }
    })
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let store = signed_in("expired");
    let refresher = Arc::new(StoreRefresher {
        store: store.clone(),
        calls: AtomicUsize::new(0),
        succeed: true,
    });
    let transport = auth_gate();
    let client = CachedFetchClient::builder(config())
        .transport(transport.clone())
        .token_provider(store)
        .token_refresher(refresher.clone())
        .build();

    let data = client.get("schedule").await.unwrap();

    assert_eq!(data, ResponseData::Json(json!({ "shift": "night" })));
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_failed_refresh_is_auth_error_and_broadcast() {
    let store = signed_in("expired");
    let refresher = Arc::new(StoreRefresher {
        store: store.clone(),
        calls: AtomicUsize::new(0),
        succeed: false,
    });
    let bus = EventBus::<DashboardEvent>::new();
    let unauthorized = record_events(&bus, names::AUTH_UNAUTHORIZED);
    let client = CachedFetchClient::builder(config())
        .transport(auth_gate())
        .token_provider(store)
        .token_refresher(refresher)
        .failure_sink(Arc::new(bus.clone()))
        .build();

    let err = client.get("schedule").await.unwrap_err();

    assert_eq!(
        err,
        ApiError::Unauthorized {
            message: "Token expired".to_string()
        }
    );
    assert_eq!(
        *unauthorized.lock().unwrap(),
        vec![DashboardEvent::Unauthorized {
            endpoint: "schedule".to_string(),
            message: "Token expired".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_failure_published_before_any_listener_is_replayed() {
    let transport = MockTransport::always(MockReply::json(503, json!({ "message": "maintenance" })));
    let bus = EventBus::<DashboardEvent>::new();
    let client = CachedFetchClient::builder(config())
        .transport(transport)
        .failure_sink(Arc::new(bus.clone()))
        .build();

    assert_err!(client.get("dashboard/summary").await);

    // Toast widget initialised late still sees the bootstrap failure
    let toasts = record_events(&bus, names::API_ERROR);
    let toasts = toasts.lock().unwrap();
    assert_eq!(toasts.len(), 1);
    assert!(matches!(
        &toasts[0],
        DashboardEvent::ApiError { status: 503, message, .. } if message.contains("maintenance")
    ));
}

#[tokio::test]
async fn test_upload_drops_json_content_type() {
    let transport = MockTransport::always(MockReply::json(201, json!({ "id": "doc-1" })));
    let client = client_with(transport.clone());

    let parts = vec![
        FormPart::text("resident_id", "7"),
        FormPart::file("scan", "care-plan.pdf", "application/pdf", b"%PDF".to_vec()),
    ];
    client.upload("documents", parts.clone()).await.unwrap();

    let request = transport.last_request();
    assert_eq!(request.method, Method::POST);
    assert!(request.headers.get(CONTENT_TYPE).is_none());
    assert_eq!(request.body, RequestBody::Multipart(parts));
}

#[tokio::test]
async fn test_download_returns_raw_bytes() {
    let transport = MockTransport::always(MockReply::bytes(200, "application/pdf", b"%PDF-1.7"));
    let client = client_with(transport.clone());

    let bytes = client.download("reports/monthly.pdf").await.unwrap();

    assert_eq!(bytes, b"%PDF-1.7".to_vec());
    assert_eq!(transport.last_request().headers[ACCEPT], "*/*");
}

#[tokio::test]
async fn test_download_keeps_json_and_text_bytes_verbatim() {
    let transport = MockTransport::new(|request| match request.url.path() {
        "/api/v1/exports/census.json" => {
            MockReply::bytes(200, "application/json", b"{\"z\": 1,  \"a\": 2}\n")
        }
        _ => MockReply::bytes(200, "text/csv; charset=iso-8859-1", b"name\ncaf\xe9\n"),
    });
    let client = client_with(transport);

    let json = client.download("exports/census.json").await.unwrap();
    let csv = client.download("exports/menu.csv").await.unwrap();

    assert_eq!(json, b"{\"z\": 1,  \"a\": 2}\n".to_vec());
    assert_eq!(csv, b"name\ncaf\xe9\n".to_vec());
}

#[tokio::test]
async fn test_download_is_not_answered_by_cached_get() {
    let transport =
        MockTransport::always(MockReply::bytes(200, "application/json", b"{ \"rooms\": 12 }"));
    let client = client_with(transport.clone());

    let parsed = client.get("reports/occupancy").await.unwrap();
    let raw = client.download("reports/occupancy").await.unwrap();

    assert_eq!(parsed, ResponseData::Json(json!({ "rooms": 12 })));
    assert_eq!(raw, b"{ \"rooms\": 12 }".to_vec());
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.cached_entries(), 2);

    // Both reads are now cached under their own keys
    client.download("reports/occupancy").await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_uploads_of_different_files_are_not_coalesced() {
    let transport =
        MockTransport::always(MockReply::json(201, json!({})).delayed(Duration::from_millis(10)));
    let client = client_with(transport.clone());

    let scan = |file_name: &str, data: &[u8]| {
        vec![FormPart::file("scan", file_name, "application/pdf", data.to_vec())]
    };
    let (a, b) = tokio::join!(
        client.upload("documents", scan("alice.pdf", b"AAAA")),
        client.upload("documents", scan("bob.pdf", b"BBBB"))
    );

    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(transport.calls(), 2);
    let sent: Vec<RequestBody> = transport.requests().into_iter().map(|r| r.body).collect();
    assert!(sent.contains(&RequestBody::Multipart(scan("alice.pdf", b"AAAA"))));
    assert!(sent.contains(&RequestBody::Multipart(scan("bob.pdf", b"BBBB"))));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_does_not_strand_the_call() {
    let transport = MockTransport::always(
        MockReply::json(200, json!([{ "id": 1 }])).delayed(Duration::from_secs(5)),
    );
    let client = client_with(transport.clone());

    let cancelled = tokio::time::timeout(Duration::from_millis(10), client.get("residents")).await;
    assert_err!(cancelled);
    assert_eq!(client.in_flight(), 1);

    // The call finishes on its own and releases its key
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.cached_entries(), 1);

    let data = client.get("residents").await.unwrap();
    assert_eq!(data, ResponseData::Json(json!([{ "id": 1 }])));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_after_cancelled_mutation_goes_to_network() {
    let transport = MockTransport::always(
        MockReply::json(201, json!({ "ok": true })).delayed(Duration::from_secs(5)),
    );
    let client = client_with(transport.clone());
    let note = json!({ "resident": 7, "text": "Fall risk reviewed" });

    let cancelled =
        tokio::time::timeout(Duration::from_millis(10), client.post("notes", &note)).await;
    assert_err!(cancelled);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(client.in_flight(), 0);

    assert_ok!(client.post("notes", &note).await);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_typed_helpers() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct StockLevel {
        item: String,
        qty: u32,
    }

    let transport = MockTransport::new(|request| {
        if request.method == Method::POST {
            MockReply::json(200, json!({ "item": "gloves", "qty": 112 }))
        } else {
            MockReply::json(200, json!([{ "item": "gloves", "qty": 12 }]))
        }
    });
    let client = client_with(transport.clone());

    let levels: Vec<StockLevel> = client.get_json("inventory").await.unwrap();
    assert_eq!(
        levels,
        vec![StockLevel {
            item: "gloves".to_string(),
            qty: 12
        }]
    );

    let restocked: StockLevel = client
        .post_json("inventory/gloves/restock", &json!({ "qty": 100 }))
        .await
        .unwrap();
    assert_eq!(restocked.qty, 112);
    assert_eq!(
        transport.last_request().body,
        RequestBody::Json(json!({ "qty": 100 }))
    );
}

#[tokio::test]
async fn test_absolute_endpoint_bypasses_base_url() {
    let transport = MockTransport::always(MockReply::json(200, json!({ "reply": "hi" })));
    let client = client_with(transport.clone());

    client
        .post("https://assistant.example.org/api/chat", &json!({ "message": "hello" }))
        .await
        .unwrap();

    assert_eq!(
        transport.last_request().url.as_str(),
        "https://assistant.example.org/api/chat"
    );
}

#[tokio::test]
async fn test_invalid_url_is_reported() {
    let transport = MockTransport::always(MockReply::json(200, json!({})));
    let client = CachedFetchClient::builder(ClientConfig::new("not a url"))
        .transport(transport.clone())
        .build();

    let err = client.get("residents").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    assert_eq!(transport.calls(), 0);
}
