//! HTTP client for the bot gateway.
//!
//! Every call carries the `X-API-Key` header. Timeouts depend on the call class:
//! status lookups are short because verification runs often, creation and
//! transcript fetches get the longer request timeout.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::transcript::{assemble_segments, Segment};
use super::{
    BotGateway, BotLookup, BotRequest, BotStatus, CreateOutcome, GatewayError, TranscriptSnapshot,
};
use crate::config::GatewayConfig;

const API_KEY_HEADER: &str = "X-API-Key";

/// Request body for `POST /bots`.
#[derive(Debug, Serialize)]
struct CreateBotPayload<'a> {
    platform: &'a str,
    meeting_url: &'a str,
    native_meeting_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
    name: &'a str,
    wait_for_host: bool,
    auto_leave_on_empty: bool,
    wait_for_admission: bool,
    admission_timeout: u64,
    persistent: bool,
    retry_on_disconnect: bool,
}

/// Response from `GET /transcripts/{platform}/{meeting}`.
#[derive(Debug, Default, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub request: Duration,
    pub status: Duration,
    pub delete: Duration,
}

impl From<&GatewayConfig> for Timeouts {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            request: Duration::from_secs(config.request_timeout_secs),
            status: Duration::from_secs(config.status_timeout_secs),
            delete: Duration::from_secs(config.delete_timeout_secs),
        }
    }
}

pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    platform: String,
    timeouts: Timeouts,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: &str, platform: &str, timeouts: Timeouts) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            platform: platform.to_string(),
            timeouts,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let client = Self::new(
            &config.base_url,
            config.api_key.as_deref().unwrap_or_default(),
            &config.platform,
            Timeouts::from(config),
        );
        info!(
            "Initialized gateway client with base URL: {}",
            client.base_url
        );
        client
    }

    fn meeting_path(&self, meeting_ref: &str) -> String {
        format!("{}/bots/{}/{}", self.base_url, self.platform, meeting_ref)
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Option<Value>, GatewayError> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Pull bot records out of the shapes the gateway answers with: a bare list,
/// a list wrapped in an object, or a single record.
fn bot_records(value: &Value) -> Vec<BotStatus> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(object) => ["bots", "running_bots"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_array))
            .map(|items| items.iter().collect())
            .unwrap_or_else(|| vec![value]),
        _ => Vec::new(),
    };

    items.into_iter().filter_map(BotStatus::from_value).collect()
}

#[async_trait]
impl BotGateway for GatewayClient {
    async fn create(&self, request: &BotRequest) -> Result<CreateOutcome, GatewayError> {
        let url = format!("{}/bots", self.base_url);
        let payload = CreateBotPayload {
            platform: &self.platform,
            meeting_url: &request.meeting_url,
            native_meeting_id: &request.meeting_ref,
            webhook_url: request.webhook_url.as_deref(),
            name: &request.name,
            wait_for_host: request.options.wait_for_host,
            auto_leave_on_empty: request.options.auto_leave_on_empty,
            wait_for_admission: request.options.wait_for_admission,
            admission_timeout: request.options.admission_timeout_secs,
            persistent: request.options.persistent,
            retry_on_disconnect: request.options.retry_on_disconnect,
        };

        debug!("Requesting bot for meeting {}", request.meeting_ref);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .timeout(self.timeouts.request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::CONFLICT {
            warn!(
                "Gateway reports a bot already exists for meeting {}",
                request.meeting_ref
            );
            return Ok(CreateOutcome::Conflict);
        }

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        let bot_id = BotStatus::from_value(&value)
            .and_then(|bot| bot.bot_id)
            .ok_or_else(|| GatewayError::Decode(format!("bot id missing in response: {body}")))?;

        info!(
            "Gateway created bot {} for meeting {}",
            bot_id, request.meeting_ref
        );
        Ok(CreateOutcome::Created { bot_id })
    }

    async fn delete(&self, meeting_ref: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.meeting_path(meeting_ref))
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeouts.delete)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
                info!("Bot removed from meeting {}", meeting_ref);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("No bot to remove for meeting {}", meeting_ref);
                Ok(())
            }
            _ => Err(GatewayError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn status(&self, lookup: BotLookup<'_>) -> Result<Option<BotStatus>, GatewayError> {
        let url = match lookup {
            BotLookup::ByMeeting(meeting_ref) => self.meeting_path(meeting_ref),
            BotLookup::ById(bot_id) => format!("{}/bots/{}", self.base_url, bot_id),
        };

        let Some(value) = self.get_json(&url, self.timeouts.status).await? else {
            return Ok(None);
        };

        let mut records = bot_records(&value);
        let position = records.iter().position(|bot| match lookup {
            BotLookup::ByMeeting(meeting_ref) => bot.is_for_meeting(meeting_ref),
            BotLookup::ById(bot_id) => bot.bot_id.as_deref() == Some(bot_id),
        });

        Ok(match position {
            Some(index) => Some(records.swap_remove(index)),
            None => records.into_iter().next(),
        })
    }

    async fn list(&self) -> Result<Vec<BotStatus>, GatewayError> {
        let url = format!("{}/bots", self.base_url);
        Ok(self
            .get_json(&url, self.timeouts.status)
            .await?
            .map(|value| bot_records(&value))
            .unwrap_or_default())
    }

    async fn transcript(&self, meeting_ref: &str) -> Result<TranscriptSnapshot, GatewayError> {
        let url = format!(
            "{}/transcripts/{}/{}",
            self.base_url, self.platform, meeting_ref
        );

        let Some(value) = self.get_json(&url, self.timeouts.request).await? else {
            return Ok(TranscriptSnapshot::default());
        };

        let response: TranscriptResponse =
            serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))?;

        let text = match response.transcript {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => assemble_segments(&response.segments),
        };
        let meeting_ended = response
            .status
            .as_deref()
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "completed" | "ended" | "finished"))
            .unwrap_or(false);

        Ok(TranscriptSnapshot {
            text,
            meeting_ended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BotOptions, BotPhase};
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json},
        routing::{delete, get, post},
        Router,
    };
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorded {
        create_bodies: Arc<Mutex<Vec<Value>>>,
        api_keys: Arc<Mutex<Vec<String>>>,
    }

    fn note_key(state: &Recorded, headers: &HeaderMap) {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        state.api_keys.lock().unwrap().push(key);
    }

    async fn create_bot(
        State(state): State<Recorded>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        note_key(&state, &headers);
        let meeting = body["native_meeting_id"].as_str().unwrap_or_default().to_string();
        state.create_bodies.lock().unwrap().push(body);
        match meeting.as_str() {
            "taken" => (StatusCode::CONFLICT, Json(json!({"detail": "exists"}))),
            "broken" => (StatusCode::BAD_GATEWAY, Json(json!({"detail": "down"}))),
            _ => (StatusCode::CREATED, Json(json!({"id": 17, "status": "requested"}))),
        }
    }

    async fn delete_bot(Path((_platform, meeting)): Path<(String, String)>) -> StatusCode {
        match meeting.as_str() {
            "gone" => StatusCode::NOT_FOUND,
            "locked" => StatusCode::FORBIDDEN,
            _ => StatusCode::ACCEPTED,
        }
    }

    async fn bot_by_meeting(
        Path((_platform, meeting)): Path<(String, String)>,
    ) -> impl IntoResponse {
        match meeting.as_str() {
            "missing" => (StatusCode::NOT_FOUND, Json(json!({}))),
            _ => (
                StatusCode::OK,
                Json(json!([
                    {"id": "other", "native_meeting_id": "elsewhere", "status": "active"},
                    {"id": "b1", "native_meeting_id": meeting, "status": "waiting_for_admission"}
                ])),
            ),
        }
    }

    async fn bot_by_id(Path(id): Path<String>) -> impl IntoResponse {
        Json(json!({"bot_id": id, "meeting_id": "abc", "status": "in_meeting"}))
    }

    async fn list_bots() -> impl IntoResponse {
        Json(json!({"running_bots": [
            {"id": "b1", "native_meeting_id": "abc", "status": "active"},
            {"id": "b2", "native_meeting_id": "xyz", "status": "left"}
        ]}))
    }

    async fn transcript(Path((_platform, meeting)): Path<(String, String)>) -> impl IntoResponse {
        match meeting.as_str() {
            "flat" => Json(json!({"status": "active", "transcript": " hello world "})),
            "segments" => Json(json!({
                "status": "completed",
                "segments": [
                    {"start": 3.0, "text": "world"},
                    {"start": 1.0, "text": "hello"}
                ]
            })),
            _ => Json(json!({"status": "active", "segments": []})),
        }
    }

    async fn spawn_gateway() -> (GatewayClient, Recorded) {
        let recorded = Recorded::default();
        let app = Router::new()
            .route("/bots", post(create_bot).get(list_bots))
            .route("/bots/:platform/:meeting", delete(delete_bot).get(bot_by_meeting))
            .route("/bots/:id", get(bot_by_id))
            .route("/transcripts/:platform/:meeting", get(transcript))
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let timeouts = Timeouts {
            request: Duration::from_secs(5),
            status: Duration::from_secs(5),
            delete: Duration::from_secs(5),
        };
        let client = GatewayClient::new(
            &format!("http://{addr}/"),
            "secret-key",
            "google_meet",
            timeouts,
        );
        (client, recorded)
    }

    fn request(meeting: &str) -> BotRequest {
        BotRequest {
            meeting_ref: meeting.to_string(),
            meeting_url: format!("https://meet.google.com/{meeting}"),
            webhook_url: Some("http://sink.local/hook".to_string()),
            name: "Athena".to_string(),
            options: BotOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_create_sends_options_and_key() {
        let (client, recorded) = spawn_gateway().await;

        let outcome = client.create(&request("abc")).await.unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::Created {
                bot_id: "17".to_string()
            }
        );

        let bodies = recorded.create_bodies.lock().unwrap();
        let body = &bodies[0];
        assert_eq!(body["platform"], "google_meet");
        assert_eq!(body["native_meeting_id"], "abc");
        assert_eq!(body["webhook_url"], "http://sink.local/hook");
        assert_eq!(body["wait_for_host"], false);
        assert_eq!(body["persistent"], true);
        assert_eq!(body["admission_timeout"], 600);
        assert_eq!(body["retry_on_disconnect"], true);
        assert_eq!(recorded.api_keys.lock().unwrap()[0], "secret-key");
    }

    #[tokio::test]
    async fn test_create_conflict_and_failure() {
        let (client, _) = spawn_gateway().await;

        assert_eq!(
            client.create(&request("taken")).await.unwrap(),
            CreateOutcome::Conflict
        );

        let err = client.create(&request("broken")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (client, _) = spawn_gateway().await;
        assert!(client.delete("abc").await.is_ok());
        assert!(client.delete("gone").await.is_ok());
        assert!(client.delete("locked").await.is_err());
    }

    #[tokio::test]
    async fn test_status_by_meeting_picks_matching_record() {
        let (client, _) = spawn_gateway().await;

        let status = client
            .status(BotLookup::ByMeeting("abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.bot_id.as_deref(), Some("b1"));
        assert_eq!(status.phase, BotPhase::WaitingForAdmission);

        assert!(client
            .status(BotLookup::ByMeeting("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_status_by_id() {
        let (client, _) = spawn_gateway().await;
        let status = client.status(BotLookup::ById("b9")).await.unwrap().unwrap();
        assert_eq!(status.bot_id.as_deref(), Some("b9"));
        assert_eq!(status.phase, BotPhase::Active);
    }

    #[tokio::test]
    async fn test_list_unwraps_running_bots() {
        let (client, _) = spawn_gateway().await;
        let bots = client.list().await.unwrap();
        assert_eq!(bots.len(), 2);
        assert_eq!(bots[1].phase, BotPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_transcript_shapes() {
        let (client, _) = spawn_gateway().await;

        let flat = client.transcript("flat").await.unwrap();
        assert_eq!(flat.text, "hello world");
        assert!(!flat.meeting_ended);

        let assembled = client.transcript("segments").await.unwrap();
        assert_eq!(assembled.text, "hello world");
        assert!(assembled.meeting_ended);

        let empty = client.transcript("quiet").await.unwrap();
        assert!(empty.text.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        let client = GatewayClient::new(
            "http://127.0.0.1:9",
            "k",
            "google_meet",
            Timeouts {
                request: Duration::from_secs(2),
                status: Duration::from_secs(2),
                delete: Duration::from_secs(2),
            },
        );
        let err = client.list().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
