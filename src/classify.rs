use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::traits::{SessionClassification, SessionClassifier, SessionStatus, TextCompletion};

const CLASSIFY_PROMPT: &str = "You label chat messages from gamers. Decide whether the \
message says the user is STARTING a gaming session, ENDING one, or NEITHER. \
Respond with JSON only, no prose:\n\
{\"gaming_status\": \"starting\" | \"ending\" | \"neither\", \
\"confidence\": 0.0-1.0, \"game_name\": string or null}";

const GOAL_PROMPT: &str = "You analyze a user's health goal statement. Respond with JSON \
only, no prose:\n\
{\"primary_goal\": short label like \"weight loss\" or \"muscle gain\", \
\"summary\": one sentence, \"dietary_needs\": array of short strings}";

/// Strip a markdown code fence if the model wrapped its JSON in one.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .trim_end_matches('`')
        .trim()
}

#[derive(Deserialize)]
struct ClassifyPayload {
    gaming_status: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    game_name: Option<String>,
}

/// Session classifier backed by a text-completion model. Malformed output is
/// an error; the caller already treats errors as "no signal".
pub struct LlmSessionClassifier {
    llm: Arc<dyn TextCompletion>,
}

impl LlmSessionClassifier {
    pub fn new(llm: Arc<dyn TextCompletion>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SessionClassifier for LlmSessionClassifier {
    async fn classify(&self, text: &str) -> anyhow::Result<SessionClassification> {
        let raw = self.llm.complete(CLASSIFY_PROMPT, &[], text).await?;
        let payload: ClassifyPayload = serde_json::from_str(extract_json(&raw))?;
        let status = match payload.gaming_status.as_str() {
            "starting" => SessionStatus::Starting,
            "ending" => SessionStatus::Ending,
            _ => SessionStatus::Neither,
        };
        debug!(
            status = ?status,
            confidence = payload.confidence,
            "Classified session signal"
        );
        Ok(SessionClassification {
            status,
            confidence: payload.confidence.clamp(0.0, 1.0),
            game: payload.game_name.filter(|g| !g.trim().is_empty()),
        })
    }
}

/// Structured reading of a free-text health goal.
#[derive(Debug, Deserialize)]
pub struct GoalAnalysis {
    pub primary_goal: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub dietary_needs: Vec<String>,
}

/// Ask the model to structure a goal statement. Errors bubble up; the caller
/// falls back to storing the raw text as the primary goal.
pub async fn analyze_goal(
    llm: &dyn TextCompletion,
    goal_text: &str,
) -> anyhow::Result<GoalAnalysis> {
    let raw = llm.complete(GOAL_PROMPT, &[], goal_text).await?;
    Ok(serde_json::from_str(extract_json(&raw))?)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::ChatTurn;

    struct CannedLlm {
        replies: Mutex<Vec<anyhow::Result<String>>>,
    }

    impl CannedLlm {
        fn with(replies: Vec<anyhow::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl TextCompletion for CannedLlm {
        async fn complete(
            &self,
            _system: &str,
            _history: &[ChatTurn],
            _user: &str,
        ) -> anyhow::Result<String> {
            self.replies.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn extract_json_strips_fences() {
        assert_eq!(extract_json("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn fenced_classification_parses() {
        let llm = CannedLlm::with(vec![Ok(
            "```json\n{\"gaming_status\": \"starting\", \"confidence\": 0.92, \"game_name\": \"Valorant\"}\n```".to_string(),
        )]);
        let classifier = LlmSessionClassifier::new(llm);
        let c = classifier.classify("about to queue up").await.unwrap();
        assert_eq!(c.status, SessionStatus::Starting);
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert_eq!(c.game.as_deref(), Some("Valorant"));
    }

    #[tokio::test]
    async fn unknown_status_becomes_neither() {
        let llm = CannedLlm::with(vec![Ok(
            r#"{"gaming_status": "unsure", "confidence": 0.9}"#.to_string(),
        )]);
        let classifier = LlmSessionClassifier::new(llm);
        let c = classifier.classify("hmm").await.unwrap();
        assert_eq!(c.status, SessionStatus::Neither);
        assert!(c.game.is_none());
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_clamped() {
        let llm = CannedLlm::with(vec![Ok(
            r#"{"gaming_status": "ending", "confidence": 3.5}"#.to_string(),
        )]);
        let classifier = LlmSessionClassifier::new(llm);
        let c = classifier.classify("done").await.unwrap();
        assert!((c.confidence - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let llm = CannedLlm::with(vec![Ok("I think they're gaming!".to_string())]);
        let classifier = LlmSessionClassifier::new(llm);
        assert!(classifier.classify("gg").await.is_err());
    }

    #[tokio::test]
    async fn goal_analysis_parses_structured_payload() {
        let llm = CannedLlm::with(vec![Ok(
            r#"{"primary_goal": "muscle gain", "summary": "Bulk for the season.", "dietary_needs": ["high protein"]}"#
                .to_string(),
        )]);
        let analysis = analyze_goal(llm.as_ref(), "I want to bulk up").await.unwrap();
        assert_eq!(analysis.primary_goal, "muscle gain");
        assert_eq!(analysis.dietary_needs, vec!["high protein"]);
    }
}
