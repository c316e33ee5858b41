use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use concierge_core::config::LlmConfig;
use concierge_core::errors::{PipelineError, PipelineStage};
use concierge_core::Intent;

use crate::llm::CompletionClient;

const INSTRUCTION_TEMPLATE: &str = r#"You are the intent classifier for a customer service system.
Read the customer request and the session context, then answer with a single JSON object and nothing else:

{
  "intent_type": "<one of: order_modification | order_inquiry | account_inquiry | product_inquiry | complaint>",
  "action": "<short snake_case verb phrase, e.g. change_address, cancel, track>",
  "target_entity": "<order | customer | product | account>",
  "parameters": { "<key>": <value> },
  "unresolved_refs": ["<each entity mention you cannot ground, kept verbatim, e.g. \"my last order\">"],
  "confidence": <number between 0 and 1>
}

Keep ungroundable references verbatim in unresolved_refs; never guess an id.

Session context:
{session}

Customer request:
{query}
"#;

/// Turns a free-form request into a structured intent through the
/// completion service. Malformed output gets exactly one corrective retry;
/// the second failure is a typed classification error.
pub struct IntentClassifier<C> {
    client: C,
    temperature: f64,
    timeout: Duration,
}

impl<C> IntentClassifier<C>
where
    C: CompletionClient,
{
    pub fn new(client: C, config: &LlmConfig) -> Self {
        Self {
            client,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub async fn classify(
        &self,
        query: &str,
        session_context: &BTreeMap<String, Value>,
    ) -> Result<Intent, PipelineError> {
        let prompt = build_prompt(query, session_context);
        let raw = self.complete(&prompt).await?;

        let first_failure = match parse_intent(&raw) {
            Ok(intent) => {
                debug!(
                    event_name = "classifier.intent_parsed",
                    intent_key = %intent.intent_key(),
                    confidence = intent.confidence,
                    "intent classified on first attempt"
                );
                return Ok(intent);
            }
            Err(failure) => failure,
        };

        let corrective = corrective_prompt(&prompt, &raw, &first_failure);
        let retried = self.complete(&corrective).await?;
        parse_intent(&retried).map_err(|second_failure| PipelineError::Classification {
            detail: format!("{first_failure}; after corrective retry: {second_failure}"),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        match tokio::time::timeout(self.timeout, self.client.complete(prompt, self.temperature))
            .await
        {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(error)) => Err(PipelineError::Classification {
                detail: format!("completion call failed: {error}"),
            }),
            Err(_) => Err(PipelineError::Timeout {
                stage: PipelineStage::Classification,
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn build_prompt(query: &str, session_context: &BTreeMap<String, Value>) -> String {
    let session = serde_json::to_string(session_context).unwrap_or_else(|_| "{}".to_string());
    INSTRUCTION_TEMPLATE.replace("{session}", &session).replace("{query}", query)
}

fn corrective_prompt(original: &str, raw: &str, failure: &str) -> String {
    format!(
        "{original}\n\nYour previous answer was rejected: {failure}.\n\
         Previous answer:\n{raw}\n\n\
         Answer again with exactly one valid JSON object matching the schema above."
    )
}

#[derive(Debug, Deserialize)]
struct IntentDraft {
    intent_type: String,
    action: String,
    target_entity: String,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    #[serde(default)]
    unresolved_refs: Vec<String>,
    confidence: f64,
}

fn parse_intent(raw: &str) -> Result<Intent, String> {
    let body = extract_json_object(raw).ok_or("no JSON object found in completion output")?;
    let draft: IntentDraft =
        serde_json::from_str(body).map_err(|error| format!("invalid intent JSON: {error}"))?;

    for (value, field) in [
        (&draft.intent_type, "intent_type"),
        (&draft.action, "action"),
        (&draft.target_entity, "target_entity"),
    ] {
        if value.trim().is_empty() {
            return Err(format!("field `{field}` must be a non-empty string"));
        }
    }

    let unresolved_refs: BTreeSet<String> = draft
        .unresolved_refs
        .into_iter()
        .filter(|reference| !reference.trim().is_empty())
        .collect();

    Ok(Intent {
        intent_type: draft.intent_type,
        action: draft.action,
        target_entity: draft.target_entity,
        parameters: draft.parameters,
        unresolved_refs,
        confidence: draft.confidence.clamp(0.0, 1.0),
    })
}

/// The model sometimes wraps its answer in prose or code fences; take the
/// outermost brace-delimited region.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;

    use concierge_core::config::{AppConfig, LlmConfig};
    use concierge_core::errors::{PipelineError, PipelineStage};

    use crate::classifier::IntentClassifier;
    use crate::llm::CompletionClient;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, prompt: &str, _temperature: f64) -> Result<String> {
            self.calls.lock().expect("calls lock").push(prompt.to_string());
            let response =
                self.responses.lock().expect("responses lock").pop().expect("scripted response");
            Ok(response)
        }
    }

    struct SlowClient;

    #[async_trait]
    impl CompletionClient for SlowClient {
        async fn complete(&self, _prompt: &str, _temperature: f64) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn valid_output_classifies_on_the_first_attempt() {
        let client = ScriptedClient::new(vec![VALID_RESPONSE]);
        let classifier = IntentClassifier::new(client, &llm_config());

        let intent = classifier
            .classify("please change where my last order ships", &BTreeMap::new())
            .await
            .expect("classify");

        assert_eq!(intent.intent_key(), "order_modification:change_address");
        assert!(intent.unresolved_refs.contains("my last order"));
        assert_eq!(
            intent.parameters.get("new_address"),
            Some(&serde_json::json!("44 Cedar Loop"))
        );
        assert_eq!(classifier.client.calls.lock().expect("calls").len(), 1);
    }

    #[tokio::test]
    async fn code_fenced_output_is_still_parsed() {
        let fenced = format!("```json\n{VALID_RESPONSE}\n```");
        let client = ScriptedClient::new(vec![fenced.as_str()]);
        let classifier = IntentClassifier::new(client, &llm_config());

        let intent =
            classifier.classify("change my address", &BTreeMap::new()).await.expect("classify");
        assert_eq!(intent.action, "change_address");
    }

    #[tokio::test]
    async fn malformed_output_gets_one_corrective_retry() {
        let client = ScriptedClient::new(vec!["sorry, I cannot do that", VALID_RESPONSE]);
        let classifier = IntentClassifier::new(client, &llm_config());

        let intent =
            classifier.classify("change my address", &BTreeMap::new()).await.expect("classify");
        assert_eq!(intent.intent_type, "order_modification");

        let calls = classifier.client.calls.lock().expect("calls");
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("previous answer was rejected"));
    }

    #[tokio::test]
    async fn second_malformed_output_is_a_classification_error() {
        let client = ScriptedClient::new(vec!["not json", "{\"intent_type\": \"\"}"]);
        let classifier = IntentClassifier::new(client, &llm_config());

        let error = classifier
            .classify("change my address", &BTreeMap::new())
            .await
            .expect_err("must fail after retry");
        assert!(matches!(error, PipelineError::Classification { .. }));
        assert_eq!(error.stage(), PipelineStage::Classification);
    }

    #[tokio::test]
    async fn confidence_is_clamped_into_unit_range() {
        let inflated = VALID_RESPONSE.replace("0.93", "7.5");
        let client = ScriptedClient::new(vec![inflated.as_str()]);
        let classifier = IntentClassifier::new(client, &llm_config());

        let intent =
            classifier.classify("change my address", &BTreeMap::new()).await.expect("classify");
        assert_eq!(intent.confidence, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_completion_times_out_with_the_stage_tag() {
        let classifier = IntentClassifier::new(SlowClient, &llm_config());

        let error = classifier
            .classify("change my address", &BTreeMap::new())
            .await
            .expect_err("must time out");
        assert_eq!(
            error,
            PipelineError::Timeout { stage: PipelineStage::Classification, timeout_secs: 30 }
        );
    }

    fn llm_config() -> LlmConfig {
        AppConfig::default().llm
    }

    const VALID_RESPONSE: &str = r#"{
  "intent_type": "order_modification",
  "action": "change_address",
  "target_entity": "order",
  "parameters": {"new_address": "44 Cedar Loop"},
  "unresolved_refs": ["my last order"],
  "confidence": 0.93
}"#;
}
