//! # Segmented Streaming Sessions
//!
//! HTTP client for the segmented-streaming session endpoint and the manifest
//! readiness probe.

use crate::error::{PlaybackError, Result};
use crate::retry_hint::{parse_retry_hint_from_body, RetryHintBounds};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use core_runtime::logging::{redact_if_sensitive, strip_query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

pub const LOAD_ID_HEADER: &str = "x-segmented-startup-load-id";
pub const CORRELATION_ID_HEADER: &str = "x-segmented-startup-correlation-id";
pub const SESSION_TOKEN_HEADER: &str = "x-segmented-session-token";

const SESSIONS_PATH: &str = "stream/segmented/sessions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamQuality {
    #[default]
    Auto,
    Low,
    Medium,
    High,
    Lossless,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub track_id: String,
    pub source_type: String,
    pub quality: StreamQuality,
    /// Startup diagnostics; sent only when finite.
    pub startup_load_id: Option<f64>,
    /// Startup diagnostics; sent only when non-blank after trimming.
    pub startup_correlation_id: Option<String>,
}

impl SessionRequest {
    pub fn new(track_id: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            source_type: source_type.into(),
            quality: StreamQuality::default(),
            startup_load_id: None,
            startup_correlation_id: None,
        }
    }

    pub fn with_quality(mut self, quality: StreamQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_diagnostics(mut self, load_id: Option<f64>, correlation_id: Option<String>) -> Self {
        self.startup_load_id = load_id;
        self.startup_correlation_id = correlation_id;
        self
    }

    /// Diagnostic headers that pass validation.
    pub fn diagnostic_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(load_id) = self.startup_load_id.filter(|id| id.is_finite()) {
            headers.push((LOAD_ID_HEADER, format!("{load_id}")));
        }
        if let Some(correlation) = self
            .startup_correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            headers.push((CORRELATION_ID_HEADER, correlation.to_string()));
        }
        headers
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequestBody<'a> {
    track_id: &'a str,
    source_type: &'a str,
    quality: StreamQuality,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponseBody {
    #[serde(alias = "session_id")]
    session_id: String,
    #[serde(alias = "manifest_url")]
    manifest_url: String,
    #[serde(default, alias = "session_token")]
    session_token: Option<String>,
    #[serde(default, alias = "expires_at")]
    expires_at: Option<DateTime<Utc>>,
}

/// A created segmented streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedSession {
    pub session_id: String,
    /// Absolute manifest URL.
    pub manifest_url: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SegmentedSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// Client for the session endpoint.
pub struct SegmentedSessionClient {
    http: Arc<dyn HttpClient>,
    api_base: Url,
    hint_bounds: RetryHintBounds,
}

impl SegmentedSessionClient {
    pub fn new(http: Arc<dyn HttpClient>, api_base_url: &str) -> Result<Self> {
        let mut normalized = api_base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let api_base = Url::parse(&normalized)
            .map_err(|e| PlaybackError::InvalidConfig(format!("invalid api base url: {e}")))?;
        Ok(Self {
            http,
            api_base,
            hint_bounds: RetryHintBounds::default(),
        })
    }

    pub fn with_hint_bounds(mut self, bounds: RetryHintBounds) -> Self {
        self.hint_bounds = bounds;
        self
    }

    /// Resolves a manifest URL against the API base when relative.
    pub fn resolve_manifest_url(&self, manifest_url: &str) -> Result<String> {
        self.api_base
            .join(manifest_url.trim())
            .map(String::from)
            .map_err(|e| PlaybackError::Internal(format!("invalid manifest url: {e}")))
    }

    /// Creates a session for one track.
    #[instrument(skip(self, request), fields(track_id = %request.track_id))]
    pub async fn create_session(&self, request: &SessionRequest) -> Result<SegmentedSession> {
        let url = self
            .api_base
            .join(SESSIONS_PATH)
            .map_err(|e| PlaybackError::Internal(format!("invalid sessions url: {e}")))?;

        let body = SessionRequestBody {
            track_id: &request.track_id,
            source_type: &request.source_type,
            quality: request.quality,
        };
        let mut http_request = HttpRequest::new(HttpMethod::Post, url.as_str())
            .json(&body)?
            .timeout(REQUEST_TIMEOUT);
        for (name, value) in request.diagnostic_headers() {
            http_request = http_request.header(name, value);
        }

        let response = self.http.execute(http_request).await?;
        if !response.is_success() {
            return Err(self.failure(&response, "session creation rejected"));
        }

        let parsed: SessionResponseBody = response.json()?;
        let manifest_url = self.resolve_manifest_url(&parsed.manifest_url)?;
        debug!(
            session_id = %parsed.session_id,
            manifest_url = %strip_query(&manifest_url),
            session_token = %redact_if_sensitive("session_token", parsed.session_token.as_deref().unwrap_or("")),
            "Segmented session created"
        );

        Ok(SegmentedSession {
            session_id: parsed.session_id,
            manifest_url,
            session_token: parsed.session_token,
            expires_at: parsed.expires_at,
        })
    }

    /// Checks whether the manifest can be fetched yet.
    ///
    /// `404`, `409`, `425` and `503` mean "not ready yet"; other failures
    /// carry their status and any retry hint.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn probe_manifest(&self, session: &SegmentedSession) -> Result<()> {
        let mut request =
            HttpRequest::new(HttpMethod::Get, session.manifest_url.clone()).timeout(REQUEST_TIMEOUT);
        if let Some(token) = &session.session_token {
            request = request.header(SESSION_TOKEN_HEADER, token.clone());
        }

        let response = self.http.execute(request).await?;
        match response.status {
            200..=299 => Ok(()),
            404 | 409 | 425 | 503 => Err(PlaybackError::ManifestNotReady(format!(
                "manifest returned {}",
                response.status
            ))),
            _ => Err(self.failure(&response, "manifest probe failed")),
        }
    }

    fn failure(&self, response: &HttpResponse, context: &str) -> PlaybackError {
        let body = response.text().unwrap_or_default();
        let hint = parse_retry_hint_from_body(&body, &self.hint_bounds);
        warn!(status = response.status, ?hint, "{context}");
        PlaybackError::SessionRequestFailed {
            status: response.status,
            message: context.to_string(),
            hint,
        }
    }
}
