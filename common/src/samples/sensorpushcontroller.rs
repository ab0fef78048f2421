// Copyright © SixtyFPS GmbH <info@slint.dev>
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::samples::error::{RequestError, SamplesError};
use crate::samples::samplescontroller::{Sample, SampleSeries, SamplesController};

/// Base URL of the SensorPush Gateway Cloud API.
/// For the endpoint list, see https://www.sensorpush.com/gateway-cloud-api
const SENSORPUSH_API_URL: &str = "https://api.sensorpush.com/api/v1/";

/// Row cap per samples call. A sub-range with more rows than this is
/// truncated by the API; the client does not paginate within a sub-range.
const SAMPLES_PER_REQUEST: u32 = 2_000;

/// Upper bound on concurrent per-day sample requests.
const MAX_REQUESTS_IN_FLIGHT: usize = 10;

/// Deadline for every single API call. The remote API is the only failure
/// surface, so no call runs without one.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Timestamp format the samples endpoint expects for startTime/stopTime.
const TIMESTAMP_PATTERN: &str = "%Y-%m-%dT%H:%M:%S+0000";

/// Login payload for the SensorPush API, supplied once at construction and
/// never mutated. Kept around for the token re-exchange.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Successful `oauth/authorize` response. The field is optional so that a
/// rejected login surfaces as a missing code, not as a decoding error.
#[derive(Deserialize)]
struct AuthorizeResponse {
    authorization: Option<String>,
}

/// Successful `oauth/accesstoken` response.
#[derive(Deserialize)]
struct AccessTokenResponse {
    accesstoken: Option<String>,
}

/// One sensor entry from `devices/sensors`. The listing carries many more
/// attributes; only the display name matters here.
#[derive(Deserialize)]
struct SensorEntry {
    name: String,
}

/// Successful `samples` response, keyed by sensor id.
#[derive(Deserialize)]
struct SamplesResponse {
    sensors: Option<HashMap<String, Vec<Sample>>>,
}

/// Sensor id and display name, resolved once at construction.
#[derive(Clone, Debug)]
struct SensorIdentity {
    id: String,
    name: String,
}

/// Async client for the SensorPush Gateway Cloud API.
///
/// `connect` runs the whole startup sequence: exchange the credentials for
/// an authorization code, exchange the code for an access token, then
/// resolve the one sensor the account is expected to have. A client that
/// failed any of these steps is never handed out.
pub struct SensorPushClient {
    http: reqwest::Client,
    api_url: String,
    credentials: Credentials,
    token: RwLock<String>,
    sensor: SensorIdentity,
}

impl SensorPushClient {
    /// Connect to the production API.
    pub async fn connect(credentials: Credentials) -> Result<Self, SamplesError> {
        Self::connect_to(SENSORPUSH_API_URL, credentials).await
    }

    /// Connect to an alternate API base URL (trailing slash included).
    /// The integration tests point this at a local mock.
    pub async fn connect_to(
        api_url: &str,
        credentials: Credentials,
    ) -> Result<Self, SamplesError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SamplesError::setup(e.to_string()))?;

        let token = Self::exchange_token(&http, api_url, &credentials).await?;
        let sensor = Self::discover_sensor(&http, api_url, &token).await?;
        log::info!("connected, sensor {} ({})", sensor.id, sensor.name);

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            credentials,
            token: RwLock::new(token),
            sensor,
        })
    }

    /// Display name of the resolved sensor.
    pub fn sensor_name(&self) -> &str {
        &self.sensor.name
    }

    /// Fetch all readings between `start` and now.
    pub async fn get_samples_since(
        &self,
        start: DateTime<Utc>,
    ) -> Result<SampleSeries, SamplesError> {
        self.get_samples(start, Utc::now()).await
    }

    /// Fetch all readings in `[start, end]`, ascending by observation time.
    ///
    /// The range is split into 24-hour sub-ranges anchored at `start` plus
    /// a partial remainder. Request latency grows with the requested
    /// duration, so the sub-ranges are fetched concurrently and the merge
    /// sorts the result, whatever the completion order. Any failed
    /// sub-range fails the whole call.
    pub async fn get_samples(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries, SamplesError> {
        let chunks = day_chunks(start, end);
        log::debug!(
            "fetching samples from {start} to {end} in {} sub-ranges",
            chunks.len()
        );

        let mut samples: SampleSeries = stream::iter(chunks)
            .map(|(chunk_start, chunk_end)| self.fetch_chunk(chunk_start, chunk_end))
            .buffer_unordered(MAX_REQUESTS_IN_FLIGHT)
            .try_collect::<Vec<SampleSeries>>()
            .await?
            .into_iter()
            .flatten()
            .collect();
        samples.sort_by_key(|sample| sample.observed);

        log::debug!("merged {} samples", samples.len());
        Ok(samples)
    }

    /// Fetch one sub-range. A response without an entry for our sensor is
    /// an empty chunk, not an error.
    async fn fetch_chunk(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries, SamplesError> {
        let response: SamplesResponse = self
            .send_request(
                "samples",
                &json!({
                    "limit": SAMPLES_PER_REQUEST,
                    "sensors": [self.sensor.id],
                    "measures": ["temperature", "humidity", "barometric_pressure"],
                    "startTime": start.format(TIMESTAMP_PATTERN).to_string(),
                    "stopTime": end.format(TIMESTAMP_PATTERN).to_string(),
                }),
            )
            .await?;

        Ok(response
            .sensors
            .and_then(|mut by_sensor| by_sensor.remove(&self.sensor.id))
            .unwrap_or_default())
    }

    /// Issue an authenticated call, re-running the token exchange once if
    /// the API rejects the current token.
    async fn send_request<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, SamplesError> {
        let token = self.token.read().await.clone();
        match Self::post_json(&self.http, &self.api_url, Some(&token), endpoint, body).await {
            Err(e) if e.is_unauthorized() => {
                log::warn!("access token rejected on {endpoint}, re-running the token exchange");
                let fresh =
                    Self::exchange_token(&self.http, &self.api_url, &self.credentials).await?;
                *self.token.write().await = fresh.clone();
                Self::post_json(&self.http, &self.api_url, Some(&fresh), endpoint, body)
                    .await
                    .map_err(SamplesError::from)
            }
            other => other.map_err(SamplesError::from),
        }
    }

    /// The single request primitive every API call funnels through: one
    /// POST with a JSON body, `Accept: application/json` and, once a token
    /// exists, the `Authorization` header.
    async fn post_json<T: serde::de::DeserializeOwned>(
        http: &reqwest::Client,
        api_url: &str,
        token: Option<&str>,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, RequestError> {
        let url = format!("{api_url}{endpoint}");
        let mut request = http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|source| RequestError::Body {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// Run the two-step exchange: credentials to authorization code, code
    /// to access token.
    async fn exchange_token(
        http: &reqwest::Client,
        api_url: &str,
        credentials: &Credentials,
    ) -> Result<String, SamplesError> {
        let authorize: AuthorizeResponse = Self::post_json(
            http,
            api_url,
            None,
            "oauth/authorize",
            &json!({ "email": credentials.email, "password": credentials.password }),
        )
        .await
        .map_err(|e| SamplesError::auth(e.to_string()))?;

        let code = authorize
            .authorization
            .ok_or_else(|| SamplesError::auth("authorize response carried no authorization code"))?;

        let access: AccessTokenResponse = Self::post_json(
            http,
            api_url,
            None,
            "oauth/accesstoken",
            &json!({ "authorization": code }),
        )
        .await
        .map_err(|e| SamplesError::auth(e.to_string()))?;

        access
            .accesstoken
            .ok_or_else(|| SamplesError::auth("accesstoken response carried no token"))
    }

    /// Resolve the sensor the account is assumed to own. With more than
    /// one sensor the listing order decides; with zero the client refuses
    /// to come up.
    async fn discover_sensor(
        http: &reqwest::Client,
        api_url: &str,
        token: &str,
    ) -> Result<SensorIdentity, SamplesError> {
        let sensors: HashMap<String, SensorEntry> =
            Self::post_json(http, api_url, Some(token), "devices/sensors", &json!({}))
                .await
                .map_err(|e| SamplesError::discovery(e.to_string()))?;

        sensors
            .into_iter()
            .next()
            .map(|(id, entry)| SensorIdentity {
                id,
                name: entry.name,
            })
            .ok_or_else(|| SamplesError::discovery("sensor listing is empty"))
    }
}

/// Split `[start, end]` into consecutive 24-hour sub-ranges anchored at
/// `start`, plus the partial remainder up to `end`. Ranges shorter than a
/// day collapse to a single sub-range.
fn day_chunks(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let day = Duration::days(1);
    let mut chunks = Vec::new();
    let mut tick = start;
    while tick + day <= end {
        chunks.push((tick, tick + day));
        tick += day;
    }
    chunks.push((tick, end));
    chunks
}

/// Blocking bridge between the async client and the synchronous controller
/// trait the UI consumes. Owns the tokio runtime the client runs on.
pub struct SensorPushController {
    runtime: tokio::runtime::Runtime,
    client: SensorPushClient,
}

impl SensorPushController {
    /// Authenticate and resolve the sensor. Fails rather than hand out a
    /// half-connected controller.
    pub fn connect(credentials: Credentials) -> Result<Self, SamplesError> {
        let runtime =
            tokio::runtime::Runtime::new().map_err(|e| SamplesError::setup(e.to_string()))?;
        let client = runtime.block_on(SensorPushClient::connect(credentials))?;
        Ok(Self { runtime, client })
    }
}

impl SamplesController for SensorPushController {
    fn sensor_name(&self) -> Result<String, SamplesError> {
        Ok(self.client.sensor_name().to_string())
    }

    fn samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SampleSeries, SamplesError> {
        self.runtime.block_on(self.client.get_samples(start, end))
    }
}

#[test]
fn test_day_chunks_three_days_and_remainder() {
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2023, 2, 27, 6, 30, 0).unwrap();
    let end = start + Duration::days(3) + Duration::hours(5);

    let chunks = day_chunks(start, end);
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[0], (start, start + Duration::days(1)));
    assert_eq!(chunks[1], (start + Duration::days(1), start + Duration::days(2)));
    assert_eq!(chunks[2], (start + Duration::days(2), start + Duration::days(3)));
    assert_eq!(chunks[3], (start + Duration::days(3), end));
}

#[test]
fn test_day_chunks_short_range_is_a_single_sub_range() {
    let end = Utc::now();
    let start = end - Duration::minutes(30);
    assert_eq!(day_chunks(start, end), vec![(start, end)]);

    // A zero-length range still issues exactly one request.
    assert_eq!(day_chunks(end, end), vec![(end, end)]);
}

#[test]
fn test_day_chunks_cover_the_range_without_gaps() {
    let end = Utc::now();
    let start = end - Duration::days(7) - Duration::minutes(42);

    let chunks = day_chunks(start, end);
    assert_eq!(chunks.first().unwrap().0, start);
    assert_eq!(chunks.last().unwrap().1, end);
    assert!(chunks.windows(2).all(|pair| pair[0].1 == pair[1].0));
}

#[test]
fn test_request_timestamp_format() {
    use chrono::TimeZone;

    let t = Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap();
    assert_eq!(
        t.format(TIMESTAMP_PATTERN).to_string(),
        "2023-02-27T00:00:00+0000"
    );
}
