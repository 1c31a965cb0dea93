//! Danger scoring
//!
//! Scores come from an external AI service. When it is unset, slow or down,
//! a deterministic keyword scorer takes over so complaint creation never
//! waits on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::complaint::{ComplaintCategory, Media, MediaType};
use crate::types::{GrievanceError, Result};

/// Words that raise the keyword score
pub const HIGH_RISK_KEYWORDS: &[&str] = &[
    "fire",
    "emergency",
    "accident",
    "injury",
    "blood",
    "violence",
    "attack",
    "fight",
    "explosion",
    "leak",
    "gas",
    "chemical",
    "collapse",
    "flood",
    "electrocution",
    "hazard",
    "danger",
    "urgent",
    "help",
];

/// What the scorer sees of a complaint
#[derive(Debug, Clone, Serialize)]
pub struct ScoringInput {
    pub description: String,
    pub category: ComplaintCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl ScoringInput {
    /// Video outranks image when a complaint has both
    pub fn strongest_media(media: &[Media]) -> Option<MediaType> {
        if media.iter().any(|m| m.media_type == MediaType::Video) {
            Some(MediaType::Video)
        } else if media.is_empty() {
            None
        } else {
            Some(MediaType::Image)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Remote,
    Keyword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a 0-100 score
    pub fn from_percent(score: f64) -> Self {
        if score > 90.0 {
            Self::Critical
        } else if score > 70.0 {
            Self::High
        } else if score > 30.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    fn priority_bonus(&self) -> f64 {
        match self {
            Self::Critical => 50.0,
            Self::High => 30.0,
            Self::Medium => 10.0,
            Self::Low => 0.0,
        }
    }
}

/// Scorer output; `danger_score` is on the 0-10 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreResult {
    pub danger_score: f64,
    pub confidence: f64,
    pub source: ScoreSource,
}

impl ScoreResult {
    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_percent(self.danger_score * 10.0)
    }

    /// Queue priority 0-100
    pub fn priority(&self) -> u8 {
        let raw = self.danger_score * 10.0 + self.risk_level().priority_bonus();
        raw.round().clamp(0.0, 100.0) as u8
    }
}

#[async_trait]
pub trait DangerScorer: Send + Sync {
    async fn score(&self, input: &ScoringInput) -> Result<ScoreResult>;
}

/// Deterministic fallback scorer
#[derive(Debug, Default, Clone)]
pub struct KeywordScorer;

impl KeywordScorer {
    /// Score on the 0-100 scale
    pub fn percent(input: &ScoringInput) -> f64 {
        let text = input.description.to_lowercase();
        let found = HIGH_RISK_KEYWORDS
            .iter()
            .filter(|kw| text.contains(**kw))
            .count();

        let keyword_adjustment = match found {
            0 => 0.0,
            1 | 2 => 20.0,
            _ => 30.0,
        };
        let media_adjustment = match input.media_type {
            Some(MediaType::Video) => 10.0,
            Some(MediaType::Image) => 5.0,
            None => 0.0,
        };

        (input.category.base_risk() + keyword_adjustment + media_adjustment).clamp(0.0, 100.0)
    }

    /// Infallible scoring on the 0-10 scale
    pub fn evaluate(input: &ScoringInput) -> ScoreResult {
        ScoreResult {
            danger_score: round1(Self::percent(input) / 10.0),
            confidence: 0.5,
            source: ScoreSource::Keyword,
        }
    }
}

#[async_trait]
impl DangerScorer for KeywordScorer {
    async fn score(&self, input: &ScoringInput) -> Result<ScoreResult> {
        Ok(Self::evaluate(input))
    }
}

#[derive(Debug, Deserialize)]
struct RemoteScore {
    /// 0-100
    score: f64,
    #[serde(default)]
    confidence: f64,
}

/// Client for the external scoring service
pub struct HttpDangerScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDangerScorer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GrievanceError::Config(format!("Scoring client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/ai/danger-score", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DangerScorer for HttpDangerScorer {
    async fn score(&self, input: &ScoringInput) -> Result<ScoreResult> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-Request-ID", uuid::Uuid::new_v4().to_string())
            .json(input)
            .send()
            .await
            .map_err(|e| GrievanceError::UpstreamUnavailable(format!("Scoring service: {}", e)))?;

        if !resp.status().is_success() {
            return Err(GrievanceError::UpstreamUnavailable(format!(
                "Scoring service returned {}",
                resp.status()
            )));
        }

        let remote: RemoteScore = resp
            .json()
            .await
            .map_err(|e| GrievanceError::UpstreamUnavailable(format!("Scoring response: {}", e)))?;

        Ok(ScoreResult {
            danger_score: round1(remote.score.clamp(0.0, 100.0) / 10.0),
            confidence: remote.confidence.clamp(0.0, 1.0),
            source: ScoreSource::Remote,
        })
    }
}

/// Remote scorer with keyword fallback
pub struct FallbackScorer {
    remote: Option<Box<dyn DangerScorer>>,
    fallback: KeywordScorer,
}

impl FallbackScorer {
    pub fn new(remote: Option<Box<dyn DangerScorer>>) -> Self {
        Self {
            remote,
            fallback: KeywordScorer,
        }
    }

    pub fn keyword_only() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl DangerScorer for FallbackScorer {
    async fn score(&self, input: &ScoringInput) -> Result<ScoreResult> {
        if let Some(remote) = &self.remote {
            match remote.score(input).await {
                Ok(result) => {
                    debug!(score = result.danger_score, "Remote danger score");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(error = %e, "Scoring service unavailable, using keyword fallback");
                }
            }
        }
        self.fallback.score(input).await
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(description: &str, category: ComplaintCategory, media: Option<MediaType>) -> ScoringInput {
        ScoringInput {
            description: description.into(),
            category,
            media_type: media,
            lat: None,
            lng: None,
        }
    }

    struct Unreachable;

    #[async_trait]
    impl DangerScorer for Unreachable {
        async fn score(&self, _input: &ScoringInput) -> Result<ScoreResult> {
            Err(GrievanceError::UpstreamUnavailable("down".into()))
        }
    }

    #[test]
    fn test_keyword_percent() {
        // base only
        assert_eq!(
            KeywordScorer::percent(&input("overflowing bin", ComplaintCategory::Garbage, None)),
            40.0
        );
        // one keyword, image
        assert_eq!(
            KeywordScorer::percent(&input(
                "gas smell near bin",
                ComplaintCategory::Garbage,
                Some(MediaType::Image)
            )),
            65.0
        );
        // three keywords, video
        assert_eq!(
            KeywordScorer::percent(&input(
                "fire and explosion, urgent",
                ComplaintCategory::Other,
                Some(MediaType::Video)
            )),
            70.0
        );
        // clamped
        assert_eq!(
            KeywordScorer::percent(&input(
                "fire emergency injury blood",
                ComplaintCategory::MedicalEmergency,
                Some(MediaType::Video)
            )),
            100.0
        );
    }

    #[test]
    fn test_priority() {
        let low = ScoreResult {
            danger_score: 2.0,
            confidence: 0.5,
            source: ScoreSource::Keyword,
        };
        assert_eq!(low.risk_level(), RiskLevel::Low);
        assert_eq!(low.priority(), 20);

        let high = ScoreResult {
            danger_score: 8.0,
            ..low
        };
        assert_eq!(high.risk_level(), RiskLevel::High);
        assert_eq!(high.priority(), 100);

        let medium = ScoreResult {
            danger_score: 4.0,
            ..low
        };
        assert_eq!(medium.priority(), 50);
    }

    #[test]
    fn test_strongest_media() {
        let img = Media {
            media_type: MediaType::Image,
            url: "a".into(),
        };
        let vid = Media {
            media_type: MediaType::Video,
            url: "b".into(),
        };
        assert_eq!(ScoringInput::strongest_media(&[]), None);
        assert_eq!(ScoringInput::strongest_media(&[img.clone()]), Some(MediaType::Image));
        assert_eq!(ScoringInput::strongest_media(&[img, vid]), Some(MediaType::Video));
    }

    #[tokio::test]
    async fn test_fallback_on_upstream_failure() {
        let scorer = FallbackScorer::new(Some(Box::new(Unreachable)));
        let result = scorer
            .score(&input("street light out", ComplaintCategory::StreetLight, None))
            .await
            .unwrap();
        assert_eq!(result.source, ScoreSource::Keyword);
        assert_eq!(result.danger_score, 3.5);
    }

    #[tokio::test]
    async fn test_keyword_only() {
        let scorer = FallbackScorer::keyword_only();
        let result = scorer
            .score(&input("help, water flood", ComplaintCategory::WaterLeakage, None))
            .await
            .unwrap();
        assert_eq!(result.danger_score, 8.0);
    }
}
