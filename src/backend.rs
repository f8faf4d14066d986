//! Backend service boundary
//!
//! The study-assistant API owns retrieval, answer generation and speech
//! synthesis. The voice session only needs two calls from it: a spoken reply
//! to an utterance and a spoken greeting.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::emotion::{Emotion, PerformanceSnapshot};
use crate::{Error, Result};

/// Header carrying the reply text (base64, since it may contain newlines)
const RESPONSE_TEXT_HEADER: &str = "X-Response-Text";

/// Header echoing the emotion the backend spoke with
const EMOTION_HEADER: &str = "X-Emotion";

/// Fallback message when an error body has no `detail`
const GENERIC_FAILURE: &str = "Request failed";

/// Course (and optionally material) the conversation is about
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CourseContext {
    /// Backend course identifier
    pub course_id: String,

    /// Human-readable course name, used for greetings
    pub course_name: Option<String>,

    /// Uploaded material to focus on, if the student opened one
    pub upload_id: Option<String>,
}

impl CourseContext {
    /// Create a context for a course with no material selected
    #[must_use]
    pub fn new(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            ..Self::default()
        }
    }

    /// Set the course name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.course_name = Some(name.into());
        self
    }

    /// Set the material (upload) the student is studying
    #[must_use]
    pub fn with_upload(mut self, upload_id: impl Into<String>) -> Self {
        self.upload_id = Some(upload_id.into());
        self
    }
}

/// Opaque playable audio resource, always MP3
///
/// Cheap to clone; the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    data: Arc<[u8]>,
}

impl AudioClip {
    /// Wrap MP3 bytes
    #[must_use]
    pub fn mp3(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// Raw encoded bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A spoken reply from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceReply {
    /// Transcript of what the tutor says
    pub text: String,

    /// Synthesized speech
    pub audio: AudioClip,

    /// Emotion the reply was spoken with
    pub emotion: Emotion,
}

/// Request for a reply to a recognized utterance
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub utterance: String,
    pub course: CourseContext,
    pub emotion: Emotion,
}

/// Request for the session-opening greeting
#[derive(Debug, Clone)]
pub struct GreetingRequest {
    /// Greeting text to speak
    pub text: String,
    pub course: CourseContext,
    pub emotion: Emotion,
}

/// The backend calls a voice session depends on
#[async_trait]
pub trait TutorBackend: Send + Sync {
    /// Ask the tutor to answer an utterance
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or an unusable payload
    async fn voice_reply(&self, request: &ReplyRequest) -> Result<VoiceReply>;

    /// Synthesize the opening greeting
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or an unusable payload
    async fn greeting(&self, request: &GreetingRequest) -> Result<VoiceReply>;
}

#[derive(Serialize)]
struct VoiceChatBody<'a> {
    message: &'a str,
    course_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_id: Option<&'a str>,
    emotion: Emotion,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    text: &'a str,
    emotion: Emotion,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// HTTP client for the study-assistant API
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpBackend {
    /// Create a client for the API rooted at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    /// Create a client from configuration
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        let token = config
            .token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()));
        Self::new(config.base_url.clone(), token)
    }

    /// Fetch the student's overall performance
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the payload cannot be parsed
    pub async fn performance(&self) -> Result<PerformanceSnapshot> {
        let response = self
            .authorized(self.client.get(self.url("/analytics/performance")))
            .send()
            .await?;
        let response = check_status(response).await?;
        let snapshot = response.json::<PerformanceSnapshot>().await?;

        tracing::debug!(
            average = snapshot.overall_average,
            quizzes = snapshot.total_quizzes_taken,
            "fetched performance snapshot"
        );
        Ok(snapshot)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn read_audio(response: reqwest::Response) -> Result<AudioClip> {
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Network("backend returned no audio".to_string()));
        }
        Ok(AudioClip::mp3(bytes.to_vec()))
    }
}

#[async_trait]
impl TutorBackend for HttpBackend {
    async fn voice_reply(&self, request: &ReplyRequest) -> Result<VoiceReply> {
        tracing::debug!(
            course = %request.course.course_id,
            emotion = %request.emotion,
            chars = request.utterance.len(),
            "requesting voice reply"
        );

        let body = VoiceChatBody {
            message: &request.utterance,
            course_id: &request.course.course_id,
            upload_id: request.course.upload_id.as_deref(),
            emotion: request.emotion,
        };

        let response = self
            .authorized(self.client.post(self.url("/ai/voice-chat")))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "voice chat request failed");
                e
            })?;
        let response = check_status(response).await?;

        let text = decode_response_text(
            response
                .headers()
                .get(RESPONSE_TEXT_HEADER)
                .and_then(|v| v.to_str().ok()),
        )?;
        let emotion = response
            .headers()
            .get(EMOTION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Emotion::from_label)
            .unwrap_or(request.emotion);

        let audio = Self::read_audio(response).await?;

        tracing::info!(audio_bytes = audio.len(), %emotion, "voice reply received");
        Ok(VoiceReply {
            text,
            audio,
            emotion,
        })
    }

    async fn greeting(&self, request: &GreetingRequest) -> Result<VoiceReply> {
        tracing::debug!(emotion = %request.emotion, "requesting greeting audio");

        let body = SpeechBody {
            text: &request.text,
            emotion: request.emotion,
        };

        let response = self
            .authorized(self.client.post(self.url("/ai/text-to-speech")))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "greeting request failed");
                e
            })?;
        let response = check_status(response).await?;
        let audio = Self::read_audio(response).await?;

        Ok(VoiceReply {
            text: request.text.clone(),
            audio,
            emotion: request.emotion,
        })
    }
}

/// Turn a non-success response into a `Network` error carrying the API's `detail`
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body);
    tracing::error!(status = %status, detail = %detail, "backend API error");
    Err(Error::Network(format!("{status}: {detail}")))
}

/// Extract `detail` from an API error body
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body).ok().and_then(|b| b.detail) {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => GENERIC_FAILURE.to_string(),
    }
}

/// Decode the base64 reply-text header
///
/// A missing header yields an empty transcript; a malformed one is an unusable payload.
fn decode_response_text(header: Option<&str>) -> Result<String> {
    let Some(encoded) = header else {
        tracing::warn!("voice reply missing response text header");
        return Ok(String::new());
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Network(format!("malformed response text: {e}")))?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
