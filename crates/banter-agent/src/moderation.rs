//! Moderation service client.
//!
//! A [`Moderator`] returns raw per-category scores; turning scores into a
//! blocked/flagged verdict is the gate's job (`pipeline::gate`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Category name → score in `0.0..=1.0`.
pub type CategoryScores = BTreeMap<String, f64>;

#[async_trait]
pub trait Moderator: Send + Sync {
    fn name(&self) -> &str;

    async fn scores(&self, text: &str) -> Result<CategoryScores, ModerationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// OpenAI-compatible `/v1/moderations` client.
pub struct OpenAiModerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiModerator {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build moderation HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl Moderator for OpenAiModerator {
    fn name(&self) -> &str {
        "openai-moderation"
    }

    async fn scores(&self, text: &str) -> Result<CategoryScores, ModerationError> {
        let url = format!("{}/v1/moderations", self.base_url);
        debug!(len = text.len(), "sending moderation request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "input": text }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModerationError::Api {
                status,
                message: body,
            });
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ModerationError::Parse(e.to_string()))?;
        first_result_scores(parsed)
    }
}

fn first_result_scores(resp: ApiResponse) -> Result<CategoryScores, ModerationError> {
    resp.results
        .into_iter()
        .next()
        .map(|r| r.category_scores)
        .ok_or_else(|| ModerationError::Parse("moderation response has no results".to_string()))
}

#[derive(Deserialize)]
struct ApiResponse {
    results: Vec<ApiResult>,
}

#[derive(Deserialize)]
struct ApiResult {
    #[serde(default)]
    category_scores: CategoryScores,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_come_from_first_result() {
        let raw = r#"{
            "id": "modr-1",
            "results": [{
                "flagged": true,
                "categories": {"hate": true, "violence": false},
                "category_scores": {"hate": 0.91, "violence": 0.02}
            }]
        }"#;
        let scores = first_result_scores(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(scores.get("hate"), Some(&0.91));
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn empty_results_is_an_error() {
        let resp: ApiResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(first_result_scores(resp).is_err());
    }
}
