//! Decision collaborator.
//!
//! Cycles ask for targets, topics and strategy through [`DecisionEngine`].
//! Every answer is a [`Decision`]: either what the model said, or the fixed
//! default when the model could not be reached or answered something that
//! does not decode. Parse failures never leave this module.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::anthropic::{AnthropicError, MessageSender, MessagesRequest};
use crate::lead::LeadChannel;

/// A decided value and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    Model(T),
    Default(T),
}

impl<T> Decision<T> {
    pub fn into_inner(self) -> T {
        match self {
            Decision::Model(v) | Decision::Default(v) => v,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Decision::Model(v) | Decision::Default(v) => v,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Decision::Default(_))
    }

    pub fn source(&self) -> &'static str {
        match self {
            Decision::Model(_) => "model",
            Decision::Default(_) => "default",
        }
    }
}

/// How many leads to source per channel in one lead-generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadTargets {
    pub apollo: u32,
    pub linkedin: u32,
    pub referrals: u32,
    pub inbound: u32,
}

impl Default for LeadTargets {
    fn default() -> Self {
        Self {
            apollo: 25,
            linkedin: 15,
            referrals: 5,
            inbound: 3,
        }
    }
}

impl LeadTargets {
    pub fn for_channel(&self, channel: LeadChannel) -> u32 {
        match channel {
            LeadChannel::Apollo => self.apollo,
            LeadChannel::Linkedin => self.linkedin,
            LeadChannel::Referrals => self.referrals,
            LeadChannel::Inbound => self.inbound,
        }
    }

    pub fn total(&self) -> u32 {
        LeadChannel::ALL.iter().map(|c| self.for_channel(*c)).sum()
    }
}

pub const CONTENT_CHANNELS: [&str; 8] = [
    "linkedin",
    "youtube",
    "newsletter",
    "twitter",
    "medium",
    "tiktok",
    "podcasts",
    "speaking",
];

const DEFAULT_TOPIC: &str = "Practical AI adoption for growing teams";

/// Topic per content channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentPlan {
    pub topics: BTreeMap<String, String>,
}

impl Default for ContentPlan {
    fn default() -> Self {
        Self {
            topics: CONTENT_CHANNELS
                .iter()
                .map(|c| (c.to_string(), DEFAULT_TOPIC.to_string()))
                .collect(),
        }
    }
}

impl ContentPlan {
    /// Fill channels the model left out with the default topic.
    fn completed(mut self) -> Self {
        for channel in CONTENT_CHANNELS {
            self.topics
                .entry(channel.to_string())
                .or_insert_with(|| DEFAULT_TOPIC.to_string());
        }
        self
    }
}

/// The weekly strategy written into a briefing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyBrief {
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub priority_actions: Vec<String>,
    #[serde(default)]
    pub ai_decisions: Vec<String>,
    #[serde(default)]
    pub manual_items: Vec<String>,
}

impl Default for StrategyBrief {
    fn default() -> Self {
        Self {
            summary: "Analysis complete".into(),
            recommendations: Vec::new(),
            priority_actions: Vec::new(),
            ai_decisions: Vec::new(),
            manual_items: Vec::new(),
        }
    }
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn lead_targets(&self, conversion_patterns: &Value) -> Decision<LeadTargets>;

    async fn content_topics(&self, content_performance: &Value) -> Decision<ContentPlan>;

    async fn weekly_strategy(&self, weekly_report: &Value) -> Decision<StrategyBrief>;
}

/// Always answers with the defaults. Used when no API key is configured.
#[derive(Debug, Default)]
pub struct StaticDecisionEngine;

#[async_trait]
impl DecisionEngine for StaticDecisionEngine {
    async fn lead_targets(&self, _conversion_patterns: &Value) -> Decision<LeadTargets> {
        Decision::Default(LeadTargets::default())
    }

    async fn content_topics(&self, _content_performance: &Value) -> Decision<ContentPlan> {
        Decision::Default(ContentPlan::default())
    }

    async fn weekly_strategy(&self, _weekly_report: &Value) -> Decision<StrategyBrief> {
        Decision::Default(StrategyBrief::default())
    }
}

#[derive(Debug, Error)]
enum DecisionError {
    #[error("model call failed: {0}")]
    Transport(#[from] AnthropicError),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model returned no text")]
    Empty,

    #[error("malformed model output: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Asks a model for each decision and decodes its JSON answer.
pub struct LlmDecisionEngine<S> {
    sender: S,
    model: String,
    timeout: Duration,
}

impl<S: MessageSender> LlmDecisionEngine<S> {
    pub fn new(sender: S, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sender,
            model: model.into(),
            timeout,
        }
    }

    async fn ask<T: DeserializeOwned>(
        &self,
        max_tokens: u32,
        prompt: String,
    ) -> Result<T, DecisionError> {
        let req = MessagesRequest::single(&self.model, max_tokens, prompt)
            .with_system("You are a business operations planner. Respond with ONLY valid JSON, no other text.");
        let response = tokio::time::timeout(self.timeout, self.sender.send_message(&req))
            .await
            .map_err(|_| DecisionError::Timeout(self.timeout))??;
        let text = response.text().ok_or(DecisionError::Empty)?;
        Ok(serde_json::from_str(strip_code_fences(&text))?)
    }

    async fn decide<T: DeserializeOwned + Default>(
        &self,
        purpose: &str,
        max_tokens: u32,
        prompt: String,
    ) -> Decision<T> {
        match self.ask(max_tokens, prompt).await {
            Ok(value) => Decision::Model(value),
            Err(e) => {
                tracing::warn!(purpose, error = %e, "falling back to default decision");
                Decision::Default(T::default())
            }
        }
    }
}

#[async_trait]
impl<S: MessageSender> DecisionEngine for LlmDecisionEngine<S> {
    async fn lead_targets(&self, conversion_patterns: &Value) -> Decision<LeadTargets> {
        let prompt = format!(
            "Based on this conversion data, choose lead generation targets for the next hour.\n\
             Format: {{\"apollo\": <n>, \"linkedin\": <n>, \"referrals\": <n>, \"inbound\": <n>}}\n\
             Optimize for highest conversion probability.\n\
             \n\
             Conversion data: {conversion_patterns}"
        );
        self.decide("lead_targets", 300, prompt).await
    }

    async fn content_topics(&self, content_performance: &Value) -> Decision<ContentPlan> {
        let channels = CONTENT_CHANNELS.join(", ");
        let prompt = format!(
            "Pick one content topic per channel based on recent performance.\n\
             Format: a JSON object mapping each channel name to a topic string.\n\
             Channels: {channels}\n\
             \n\
             Performance: {content_performance}"
        );
        match self.decide::<ContentPlan>("content_topics", 500, prompt).await {
            Decision::Model(plan) => Decision::Model(plan.completed()),
            default => default,
        }
    }

    async fn weekly_strategy(&self, weekly_report: &Value) -> Decision<StrategyBrief> {
        let prompt = format!(
            "Analyze this weekly business performance and write strategic recommendations.\n\
             Format: {{\"summary\": \"<150 words>\", \"recommendations\": [\"...\"], \
             \"priority_actions\": [\"...\"], \"ai_decisions\": [\"...\"], \"manual_items\": [\"...\"]}}\n\
             Give the top 3 recommendations and 5 priority actions; keep manual items minimal.\n\
             \n\
             Report: {weekly_report}"
        );
        self.decide("weekly_strategy", 800, prompt).await
    }
}

/// Drop a surrounding markdown code fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::{ContentBlock, MessagesResponse, Usage};
    use parking_lot::Mutex;
    use serde_json::json;

    struct MockClient {
        result: Result<String, u16>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn err(status: u16) -> Self {
            Self {
                result: Err(status),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSender for MockClient {
        async fn send_message(
            &self,
            req: &MessagesRequest,
        ) -> Result<MessagesResponse, AnthropicError> {
            self.prompts.lock().push(req.messages[0].content.clone());
            match &self.result {
                Ok(text) => Ok(MessagesResponse {
                    id: "mock".to_string(),
                    content: vec![ContentBlock {
                        content_type: "text".to_string(),
                        text: text.clone(),
                    }],
                    model: "mock".to_string(),
                    stop_reason: Some("end_turn".to_string()),
                    usage: Usage::default(),
                }),
                Err(status) => Err(AnthropicError::ApiError {
                    status: *status,
                    message: "mock error".to_string(),
                }),
            }
        }
    }

    struct SlowClient;

    #[async_trait]
    impl MessageSender for SlowClient {
        async fn send_message(
            &self,
            _req: &MessagesRequest,
        ) -> Result<MessagesResponse, AnthropicError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(AnthropicError::ApiError {
                status: 529,
                message: "overloaded".into(),
            })
        }
    }

    fn engine(client: MockClient) -> LlmDecisionEngine<MockClient> {
        LlmDecisionEngine::new(client, "claude-haiku-4-5-20251001", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn valid_targets_come_from_the_model() {
        let engine = engine(MockClient::ok(
            r#"{"apollo": 40, "linkedin": 10, "referrals": 2, "inbound": 8}"#,
        ));
        let decision = engine.lead_targets(&json!({"apollo": 0.12})).await;
        assert_eq!(
            decision,
            Decision::Model(LeadTargets {
                apollo: 40,
                linkedin: 10,
                referrals: 2,
                inbound: 8
            })
        );
        assert!(engine.sender.prompts.lock()[0].contains("0.12"));
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let engine = engine(MockClient::ok(
            "```json\n{\"apollo\": 1, \"linkedin\": 2, \"referrals\": 3, \"inbound\": 4}\n```",
        ));
        let decision = engine.lead_targets(&Value::Null).await;
        assert!(!decision.is_default());
        assert_eq!(decision.get().total(), 10);
    }

    #[tokio::test]
    async fn malformed_output_yields_default_targets() {
        for text in [
            "not json at all",
            r#"{"apollo": 10}"#,
            r#"{"apollo": -3, "linkedin": 1, "referrals": 1, "inbound": 1}"#,
        ] {
            let decision = engine(MockClient::ok(text)).lead_targets(&Value::Null).await;
            assert_eq!(decision, Decision::Default(LeadTargets::default()), "input {text:?}");
        }
    }

    #[tokio::test]
    async fn transport_failure_yields_default() {
        let decision = engine(MockClient::err(500)).weekly_strategy(&json!({})).await;
        assert!(decision.is_default());
        assert_eq!(decision.into_inner().summary, "Analysis complete");
    }

    #[tokio::test]
    async fn slow_model_yields_default() {
        let engine = LlmDecisionEngine::new(SlowClient, "m", Duration::from_millis(20));
        let decision = engine.content_topics(&Value::Null).await;
        assert_eq!(decision, Decision::Default(ContentPlan::default()));
    }

    #[tokio::test]
    async fn partial_content_plan_is_completed() {
        let engine = engine(MockClient::ok(r#"{"linkedin": "Hiring your first ML engineer"}"#));
        let plan = engine.content_topics(&Value::Null).await;
        assert_eq!(plan.source(), "model");
        let plan = plan.into_inner();
        assert_eq!(plan.topics.len(), CONTENT_CHANNELS.len());
        assert_eq!(plan.topics["linkedin"], "Hiring your first ML engineer");
        assert_eq!(plan.topics["tiktok"], DEFAULT_TOPIC);
    }

    #[tokio::test]
    async fn strategy_lists_default_to_empty() {
        let engine = engine(MockClient::ok(r#"{"summary": "Pipeline healthy"}"#));
        let brief = engine.weekly_strategy(&json!({"revenue": 4200})).await;
        assert_eq!(
            brief,
            Decision::Model(StrategyBrief {
                summary: "Pipeline healthy".into(),
                ..StrategyBrief::default()
            })
        );
    }

    #[tokio::test]
    async fn static_engine_always_defaults() {
        let engine = StaticDecisionEngine;
        assert!(engine.lead_targets(&Value::Null).await.is_default());
        assert!(engine.content_topics(&Value::Null).await.is_default());
        assert!(engine.weekly_strategy(&Value::Null).await.is_default());
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn default_targets_total() {
        assert_eq!(LeadTargets::default().total(), 48);
    }
}
