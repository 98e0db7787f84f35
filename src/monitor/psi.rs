//! PageSpeed Insights performance scores

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::PsiConfig;

#[derive(Debug, Error)]
pub enum PsiError {
    #[error("PageSpeed request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("PageSpeed returned HTTP {0}")]
    Status(u16),

    #[error("PageSpeed response has no performance score")]
    MissingScore,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PsiResponse {
    lighthouse_result: Option<LighthouseResult>,
}

#[derive(Debug, Deserialize)]
struct LighthouseResult {
    categories: Categories,
}

#[derive(Debug, Deserialize)]
struct Categories {
    performance: Option<CategoryScore>,
}

#[derive(Debug, Deserialize)]
struct CategoryScore {
    score: Option<f64>,
}

/// Client for the PageSpeed Insights `runPagespeed` API
pub struct PsiClient {
    http_client: reqwest::Client,
    config: PsiConfig,
}

impl PsiClient {
    pub fn new(config: PsiConfig, user_agent: &str) -> Result<Self, PsiError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { http_client, config })
    }

    /// Lighthouse performance score for `url`, scaled to 0-100
    pub async fn performance_score(&self, url: &str) -> Result<f64, PsiError> {
        let mut query = vec![
            ("url", url.to_string()),
            ("strategy", self.config.strategy.clone()),
            ("category", "performance".to_string()),
        ];
        if let Some(key) = &self.config.api_key {
            query.push(("key", key.clone()));
        }

        let response = self
            .http_client
            .get(&self.config.endpoint)
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PsiError::Status(status.as_u16()));
        }

        let body: PsiResponse = response.json().await?;
        let score = body
            .lighthouse_result
            .and_then(|r| r.categories.performance)
            .and_then(|p| p.score)
            .ok_or(PsiError::MissingScore)?;

        debug!(url, score, "performance score fetched");
        Ok((score * 100.0).clamp(0.0, 100.0))
    }
}
