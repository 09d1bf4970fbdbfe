//! Best-effort alert text generation.
//!
//! Alerts have already been decided when they reach this module. Each draft
//! is sent to the enricher concurrently; any failure falls back to the
//! rule's deterministic description, so the alert list is never shortened.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDraft, AlertKind};
use crate::config::EnrichmentConfig;
use crate::models::Alert;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("request to enrichment service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("enrichment service returned status {0}")]
    Status(u16),

    #[error("enrichment service returned an empty description")]
    Empty,
}

/// Produces a human-readable description for an already-decided alert.
pub trait Enricher {
    fn describe(
        &self,
        draft: &AlertDraft,
    ) -> impl Future<Output = Result<String, EnrichError>> + Send;
}

/// Enriches every draft concurrently and keeps the input order.
pub async fn enrich_alerts<E>(drafts: Vec<AlertDraft>, enricher: &E) -> Vec<Alert>
where
    E: Enricher + Sync,
{
    let descriptions = join_all(drafts.iter().map(|draft| enricher.describe(draft))).await;

    let mut enriched = 0usize;
    let alerts: Vec<Alert> = drafts
        .into_iter()
        .zip(descriptions)
        .map(|(draft, result)| match result {
            Ok(text) => {
                enriched += 1;
                draft.finalize(Some(text))
            }
            Err(e) => {
                warn!("Using fallback text for alert {}: {}", draft.id, e);
                draft.finalize(None)
            }
        })
        .collect();

    info!("Enriched {}/{} alerts", enriched, alerts.len());
    alerts
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

const SYSTEM_PROMPT: &str = "You are an academic advisor assistant. Given the facts of a \
dashboard alert about a university course group, write a short, supportive description \
(at most two sentences) for the instructor. Do not invent numbers; use only the facts given. \
Reply with the description only.";

/// Enricher backed by an Ollama-compatible `/api/chat` endpoint.
pub struct OllamaEnricher {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaEnricher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        info!(
            "Alert enrichment enabled with model {} at {}",
            config.model, config.ollama_url
        );

        Ok(Self {
            client,
            url: format!("{}/api/chat", config.ollama_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

impl Enricher for OllamaEnricher {
    async fn describe(&self, draft: &AlertDraft) -> Result<String, EnrichError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(draft),
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        debug!("Requesting description for alert {}", draft.id);
        let response = self.client.post(&self.url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(EnrichError::Status(response.status().as_u16()));
        }

        let body: ChatResponse = response.json().await?;
        let text = body.message.content.trim();
        if text.is_empty() {
            return Err(EnrichError::Empty);
        }
        Ok(text.to_string())
    }
}

fn build_prompt(draft: &AlertDraft) -> String {
    let facts = match &draft.kind {
        AlertKind::GroupInsight { .. } => "Summarize the overall performance of the group.",
        AlertKind::StudentAtRisk { .. } => {
            "Explain why this student needs attention without being judgmental."
        }
        AlertKind::PendingSubmissions { .. } => "Describe the volume of missing submissions.",
        AlertKind::LowSubmissionRate { .. } => "Describe the low submission rate.",
    };

    format!(
        "Alert: {}\nSeverity: {}\nFacts: {}\nSuggested action: {}\nTask: {}",
        draft.title,
        draft.severity,
        draft.fallback_description(),
        draft.suggested_action,
        facts
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::compute_statistics;
    use crate::alerts::{evaluate, finalize_alerts};
    use crate::config::Thresholds;
    use crate::models::ActivityState;
    use crate::test_support::SnapshotBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails for at-risk alerts, rewrites everything else.
    struct FlakyEnricher {
        calls: AtomicUsize,
    }

    impl Enricher for FlakyEnricher {
        async fn describe(&self, draft: &AlertDraft) -> Result<String, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match draft.kind {
                AlertKind::StudentAtRisk { .. } => Err(EnrichError::Status(503)),
                AlertKind::LowSubmissionRate { .. } => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(format!("Rewritten: {}", draft.title))
                }
                _ => Ok(format!("Rewritten: {}", draft.title)),
            }
        }
    }

    struct BlankEnricher;

    impl Enricher for BlankEnricher {
        async fn describe(&self, _draft: &AlertDraft) -> Result<String, EnrichError> {
            Err(EnrichError::Empty)
        }
    }

    fn drafts() -> Vec<AlertDraft> {
        let mut builder = SnapshotBuilder::new();
        let essay = builder.activity("Essay", ActivityState::Active);
        builder.activity("Lab", ActivityState::Active);
        let top = builder.student("Top");
        builder.submit_graded(top, essay, 5.0);
        for name in ["Low A", "Low B"] {
            let student = builder.student(name);
            builder.submit_graded(student, essay, 2.0);
        }
        for i in 0..3 {
            builder.student(&format!("Quiet {i}"));
        }
        let stats = compute_statistics(&builder.context(), &builder.build(), &Thresholds::default());
        evaluate(&stats, &Thresholds::default())
    }

    #[tokio::test]
    async fn failures_fall_back_without_dropping_alerts() {
        let drafts = drafts();
        let expected_ids: Vec<String> = drafts.iter().map(|d| d.id.clone()).collect();
        let enricher = FlakyEnricher {
            calls: AtomicUsize::new(0),
        };

        let alerts = enrich_alerts(drafts.clone(), &enricher).await;

        assert_eq!(enricher.calls.load(Ordering::SeqCst), drafts.len());
        let ids: Vec<String> = alerts.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, expected_ids);

        for (alert, draft) in alerts.iter().zip(&drafts) {
            match draft.kind {
                AlertKind::StudentAtRisk { .. } => {
                    assert!(!alert.enriched);
                    assert_eq!(alert.description, draft.fallback_description());
                }
                _ => {
                    assert!(alert.enriched);
                    assert!(alert.description.starts_with("Rewritten: "));
                }
            }
            assert_eq!(alert.severity, draft.severity);
        }
    }

    #[tokio::test]
    async fn total_failure_matches_deterministic_alerts() {
        let drafts = drafts();
        let enriched = enrich_alerts(drafts.clone(), &BlankEnricher).await;
        assert_eq!(enriched, finalize_alerts(drafts));
    }

    #[tokio::test]
    async fn unreachable_service_falls_back() {
        let config = EnrichmentConfig {
            enabled: true,
            ollama_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            ..EnrichmentConfig::default()
        };
        let enricher = OllamaEnricher::new(&config).unwrap();
        let drafts = drafts();

        let alerts = enrich_alerts(drafts.clone(), &enricher).await;
        assert_eq!(alerts, finalize_alerts(drafts));
    }

    #[test]
    fn prompt_carries_rule_facts() {
        let draft = drafts().remove(0);
        let prompt = build_prompt(&draft);
        assert!(prompt.contains(&draft.title));
        assert!(prompt.contains(&draft.fallback_description()));
        assert!(prompt.contains("Severity: "));
    }
}
