//! # Water Quality Narrative
//!
//! Turns the latest readings into a human-readable analysis using a hosted
//! generative model. The call is best effort: every failure collapses into
//! `FALLBACK_ANALYSIS` so callers never have to handle an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::ky_http::{ApiClient, ApiError};
use crate::core::dispatcher::LatestReadings;
use crate::sensors::SensorKind;

/// Returned whenever an analysis cannot be produced.
pub const FALLBACK_ANALYSIS: &str = "Unable to generate analysis at this time. Please try again later.";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

/// Produces an analysis of the current readings.
#[async_trait]
pub trait Narrator: Send + Sync + 'static {
    async fn analyze(&self, readings: &LatestReadings) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeOptions {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for NarrativeOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

fn reading_line(readings: &LatestReadings, kind: SensorKind, label: &str, unit: &str) -> String {
    match readings.value(kind) {
        Some(value) => format!("{label}: {value:.2} {unit}"),
        None => format!("{label}: Not available"),
    }
}

/// Builds the instruction text sent to the model.
pub fn build_prompt(readings: &LatestReadings) -> String {
    let lines = [
        reading_line(readings, SensorKind::Ph, "pH", "pH"),
        reading_line(readings, SensorKind::Tds, "TDS", "ppm"),
        reading_line(readings, SensorKind::Phosphate, "Phosphate", "mg/L"),
        reading_line(readings, SensorKind::Level, "Water Level", "%"),
    ];

    format!(
        r#"You are a water quality analysis system. Analyze the following water parameters and reply with a single JSON object only, without markdown or code fences:

{readings}

Use this JSON structure:

{{
  "summary": "2-3 sentences on overall water quality, key concerns and system status",
  "parameters": {{
    "ph": {{ "reading": "value pH", "analysis": {{ "waterPurity": "", "componentImpact": "", "effectiveness": "", "adjustments": "" }} }},
    "tds": {{ "reading": "value ppm", "analysis": {{ "filtrationEfficiency": "", "filterCondition": "", "waterQuality": "", "systemPerformance": "" }} }},
    "phosphate": {{ "reading": "value mg/L", "analysis": {{ "contamination": "", "effectiveness": "", "maintenance": "", "impact": "" }} }}
  }},
  "recommendations": [ {{ "priority": "high/medium/low", "action": "", "reason": "" }} ],
  "safetyNotes": {{ "immediateActions": [], "consumptionGuidelines": "" }}
}}

Guidelines:
- pH: 6.5-8.5 is safe
- TDS: <300 ppm is optimal
- Phosphate: <0.5 mg/L is normal

Return only the JSON object."#,
        readings = lines.join("\n")
    )
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// `Narrator` backed by the Generative Language `generateContent` endpoint.
pub struct GeminiNarrator {
    client: Option<ApiClient>,
    model: String,
}

impl GeminiNarrator {
    /// Without an API key the narrator is built but always answers with the fallback.
    pub fn new(options: NarrativeOptions) -> Result<Self, ApiError> {
        let client = match options.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => Some(ApiClient::new(&options.base_url, None, options.timeout)?.with_header("x-goog-api-key", key)?),
            None => None,
        };
        Ok(Self {
            client,
            model: options.model,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    async fn generate(&self, client: &ApiClient, prompt: &str) -> Result<String, String> {
        let path = format!("models/{}:generateContent", self.model);
        let body = GenerateRequest {
            contents: [Content {
                parts: [RequestPart { text: prompt }],
            }],
        };

        let response = client
            .request::<GenerateResponse, _>(Method::POST, &path, None, Some(body))
            .await
            .map_err(|e| e.to_string())?;

        if !response.is_success() {
            return Err(format!(
                "status {}: {}",
                response.status,
                response.error_body.unwrap_or_default()
            ));
        }

        response
            .data
            .and_then(GenerateResponse::into_text)
            .ok_or_else(|| "response carried no text".to_string())
    }
}

#[async_trait]
impl Narrator for GeminiNarrator {
    async fn analyze(&self, readings: &LatestReadings) -> String {
        let Some(client) = &self.client else {
            tracing::warn!("Narrative requested but no API key is configured");
            return FALLBACK_ANALYSIS.to_string();
        };

        match self.generate(client, &build_prompt(readings)).await {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(model = %self.model, %error, "Error generating analysis");
                FALLBACK_ANALYSIS.to_string()
            }
        }
    }
}
