//! Integration tests for the SensorPush client, driven against a small
//! in-process HTTP mock with scripted responses.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use sensor_dashboard_common::samples::{
    Credentials, RequestError, SamplesError, SensorPushClient,
};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One scripted answer from the mock API.
struct MockResponse {
    status: u16,
    body: Value,
    delay: std::time::Duration,
}

impl MockResponse {
    fn ok(body: Value) -> Self {
        Self::with_status(200, body)
    }

    fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            delay: std::time::Duration::ZERO,
        }
    }

    fn delayed(mut self, millis: u64) -> Self {
        self.delay = std::time::Duration::from_millis(millis);
        self
    }
}

/// A recorded request: endpoint path, decoded JSON body and the
/// Authorization header, if any.
#[derive(Clone, Debug)]
struct MockRequest {
    path: String,
    body: Value,
    authorization: Option<String>,
}

type Router = Arc<dyn Fn(&MockRequest) -> MockResponse + Send + Sync>;

/// Minimal HTTP/1.1 server answering scripted JSON POSTs. Records every
/// request it sees so the tests can assert on call order and payloads.
struct MockApi {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<MockRequest>>>,
}

impl MockApi {
    async fn spawn(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<MockRequest>>> = Arc::default();

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let router = router.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, router, recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    fn recorded(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.recorded().into_iter().map(|r| r.path).collect()
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    router: Router,
    recorded: Arc<Mutex<Vec<MockRequest>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = header_value(&head, "content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .trim_start_matches('/')
        .to_string();
    let body: Value = serde_json::from_slice(&buf[body_start..body_start + content_length])
        .unwrap_or(Value::Null);

    let request = MockRequest {
        path,
        body,
        authorization: header_value(&head, "authorization"),
    };
    recorded.lock().unwrap().push(request.clone());

    let response = router(&request);
    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let payload = response.body.to_string();
    let head = format!(
        "HTTP/1.1 {} MOCK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        response.status,
        payload.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(payload.as_bytes()).await?;
    stream.shutdown().await
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.eq_ignore_ascii_case(name) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Scripted answers for the construction sequence: authorization code,
/// access token, and a single-sensor listing.
fn auth_response(request: &MockRequest) -> Option<MockResponse> {
    match request.path.as_str() {
        "oauth/authorize" => Some(MockResponse::ok(json!({ "authorization": "code-123" }))),
        "oauth/accesstoken" => Some(MockResponse::ok(json!({ "accesstoken": "token-456" }))),
        "devices/sensors" => Some(MockResponse::ok(json!({
            "id123": { "name": "Greenhouse-1", "active": true, "battery_voltage": 2.9 }
        }))),
        _ => None,
    }
}

async fn connect(api: &MockApi) -> Result<SensorPushClient, SamplesError> {
    SensorPushClient::connect_to(
        &api.base_url(),
        Credentials {
            email: "dev@example.com".to_string(),
            password: "hunter2".to_string(),
        },
    )
    .await
}

fn parse_request_time(value: &Value) -> DateTime<Utc> {
    let raw = value.as_str().expect("time field should be a string");
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .expect("time field should be ISO-8601")
        .with_timezone(&Utc)
}

/// Rows every two hours in `[start, end)`, in the API's wire shape.
fn sample_rows(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Value> {
    let mut rows = Vec::new();
    let mut observed = start;
    while observed < end {
        rows.push(json!({
            "observed": observed.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "temperature": 68.4,
            "humidity": 41.0,
            "barometric_pressure": 1013.2,
            "gateways": "gw-1"
        }));
        observed += Duration::hours(2);
    }
    rows
}

#[tokio::test]
async fn test_connect_resolves_sensor_name() {
    let api = MockApi::spawn(Arc::new(|request| {
        auth_response(request).expect("unexpected endpoint")
    }))
    .await;

    let client = connect(&api).await.unwrap();
    assert_eq!(client.sensor_name(), "Greenhouse-1");
    // The name is resolved once at construction and stays constant.
    assert_eq!(client.sensor_name(), "Greenhouse-1");

    let recorded = api.recorded();
    assert_eq!(
        api.paths(),
        vec!["oauth/authorize", "oauth/accesstoken", "devices/sensors"]
    );
    // The sensor listing already runs with the freshly issued token.
    assert_eq!(recorded[2].authorization.as_deref(), Some("token-456"));
    assert_eq!(recorded[0].body["email"], "dev@example.com");
    assert_eq!(recorded[1].body["authorization"], "code-123");
}

#[tokio::test]
async fn test_empty_sensor_listing_fails_discovery() {
    let api = MockApi::spawn(Arc::new(|request| match request.path.as_str() {
        "devices/sensors" => MockResponse::ok(json!({})),
        _ => auth_response(request).expect("unexpected endpoint"),
    }))
    .await;

    let err = connect(&api).await.unwrap_err();
    assert!(matches!(err, SamplesError::Discovery { .. }));
    // Construction stops there, no data call is ever attempted.
    assert!(!api.paths().iter().any(|p| p == "samples"));
}

#[tokio::test]
async fn test_missing_authorization_field_fails_auth() {
    let api = MockApi::spawn(Arc::new(|request| match request.path.as_str() {
        "oauth/authorize" => MockResponse::ok(json!({ "status": "invalid login" })),
        _ => auth_response(request).expect("unexpected endpoint"),
    }))
    .await;

    let err = connect(&api).await.unwrap_err();
    assert!(matches!(err, SamplesError::Auth { .. }));
    assert_eq!(api.paths(), vec!["oauth/authorize"]);
}

#[tokio::test]
async fn test_samples_merge_sorted_across_days() {
    // Three whole days plus a partial remainder.
    let start = Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap();
    let end = start + Duration::days(3) + Duration::hours(6);

    let api = MockApi::spawn(Arc::new(move |request| {
        if let Some(response) = auth_response(request) {
            return response;
        }
        assert_eq!(request.path, "samples");
        let chunk_start = parse_request_time(&request.body["startTime"]);
        let chunk_end = parse_request_time(&request.body["stopTime"]);

        // Rows arrive newest-first and the earliest chunk answers last, so
        // a correct merge cannot lean on arrival order.
        let mut rows = sample_rows(chunk_start, chunk_end);
        rows.reverse();
        let delay = if chunk_start == start { 150 } else { 0 };
        MockResponse::ok(json!({ "sensors": { "id123": rows }, "status": "OK" })).delayed(delay)
    }))
    .await;

    let client = connect(&api).await.unwrap();
    let series = client.get_samples(start, end).await.unwrap();

    let sample_requests: Vec<_> = api
        .recorded()
        .into_iter()
        .filter(|r| r.path == "samples")
        .collect();
    assert_eq!(sample_requests.len(), 4);
    assert!(sample_requests.iter().all(|r| r.body["limit"] == 2000));
    assert!(sample_requests
        .iter()
        .all(|r| r.body["sensors"] == json!(["id123"])));

    let mut ranges: Vec<_> = sample_requests
        .iter()
        .map(|r| {
            (
                parse_request_time(&r.body["startTime"]),
                parse_request_time(&r.body["stopTime"]),
            )
        })
        .collect();
    ranges.sort();
    assert_eq!(
        ranges,
        vec![
            (start, start + Duration::days(1)),
            (start + Duration::days(1), start + Duration::days(2)),
            (start + Duration::days(2), start + Duration::days(3)),
            (start + Duration::days(3), end),
        ]
    );

    assert!(!series.is_empty());
    assert!(series
        .windows(2)
        .all(|pair| pair[0].observed <= pair[1].observed));
    assert!(series
        .iter()
        .all(|sample| sample.observed >= start && sample.observed <= end));
}

#[tokio::test]
async fn test_missing_sensor_key_is_an_empty_series() {
    let api = MockApi::spawn(Arc::new(|request| match request.path.as_str() {
        "samples" => MockResponse::ok(json!({ "status": "no data" })),
        _ => auth_response(request).expect("unexpected endpoint"),
    }))
    .await;

    let client = connect(&api).await.unwrap();
    let end = Utc.with_ymd_and_hms(2023, 2, 27, 12, 0, 0).unwrap();
    let series = client.get_samples(end - Duration::minutes(20), end).await.unwrap();
    assert!(series.is_empty());
}

#[tokio::test]
async fn test_failed_sub_range_fails_the_call() {
    let start = Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap();
    let end = start + Duration::days(1) + Duration::hours(6);
    let boundary = start + Duration::days(1);

    let api = MockApi::spawn(Arc::new(move |request| {
        if let Some(response) = auth_response(request) {
            return response;
        }
        let chunk_start = parse_request_time(&request.body["startTime"]);
        if chunk_start == boundary {
            MockResponse::with_status(500, json!({ "message": "boom" }))
        } else {
            MockResponse::ok(json!({
                "sensors": { "id123": sample_rows(chunk_start, boundary) }
            }))
        }
    }))
    .await;

    let client = connect(&api).await.unwrap();
    let err = client.get_samples(start, end).await.unwrap_err();
    // One bad sub-range must not surface as a falsely-complete series.
    assert!(matches!(
        err,
        SamplesError::Request(RequestError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_rejected_token_is_exchanged_once_and_retried() {
    let samples_calls = Arc::new(AtomicUsize::new(0));
    let calls = samples_calls.clone();

    let api = MockApi::spawn(Arc::new(move |request| match request.path.as_str() {
        "samples" => {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                MockResponse::with_status(401, json!({ "message": "token expired" }))
            } else {
                MockResponse::ok(json!({ "sensors": { "id123": [] } }))
            }
        }
        _ => auth_response(request).expect("unexpected endpoint"),
    }))
    .await;

    let client = connect(&api).await.unwrap();
    let end = Utc.with_ymd_and_hms(2023, 2, 27, 12, 0, 0).unwrap();
    let series = client.get_samples(end - Duration::minutes(10), end).await.unwrap();
    assert!(series.is_empty());

    let paths = api.paths();
    assert_eq!(samples_calls.load(Ordering::SeqCst), 2);
    // One construction-time exchange, one re-exchange after the 401.
    assert_eq!(paths.iter().filter(|p| *p == "oauth/accesstoken").count(), 2);
}
