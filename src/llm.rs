//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescription;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        stream: bool,
    ) -> Result<ModelCompletion>;
}

/// Construct the model named by `cfg.provider`.
pub fn build_model(cfg: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match cfg.provider.to_ascii_lowercase().as_str() {
        "gemini" | "google" => Ok(Arc::new(GeminiClient::from_config(cfg)?)),
        "stub" => Ok(StubModel::new(Vec::new())),
        other => Err(PipelineError::Config(format!(
            "unsupported model provider `{other}`"
        ))),
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> PipelineError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return PipelineError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    PipelineError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            PipelineError::LanguageModel("missing Gemini API key in model config".into())
        })?;
        let endpoint = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .map_err(|err| PipelineError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            endpoint,
        })
    }

    fn system_instruction(messages: &[Message]) -> Option<GeminiContent> {
        let text: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if text.is_empty() {
            return None;
        }
        Some(GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(text.join("\n\n"))],
        })
    }

    fn to_contents(messages: &[Message]) -> Vec<GeminiContent> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|message| {
                let (role, part) = match (&message.tool_call, &message.tool_result) {
                    (Some(call), _) => (
                        "model",
                        GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                name: call.name.clone(),
                                args: call.arguments.clone(),
                            }),
                            ..GeminiPart::default()
                        },
                    ),
                    (None, Some(result)) => (
                        "user",
                        GeminiPart {
                            function_response: Some(GeminiFunctionResponse {
                                name: result.name.clone(),
                                response: json!({ "result": result.output }),
                            }),
                            ..GeminiPart::default()
                        },
                    ),
                    (None, None) => {
                        let role = if message.role == Role::Assistant {
                            "model"
                        } else {
                            "user"
                        };
                        (role, GeminiPart::text(message.content.clone()))
                    }
                };
                GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![part],
                }
            })
            .collect()
    }

    fn declarations(tools: &[ToolDescription]) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut decl = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                if let Some(params) = &tool.parameters {
                    decl["parameters"] = params.clone();
                }
                decl
            })
            .collect();
        json!([{ "functionDeclarations": declarations }])
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        let mut payload = json!({
            "contents": Self::to_contents(messages),
        });
        if let Some(system) = Self::system_instruction(messages) {
            payload["systemInstruction"] = serde_json::to_value(system)?;
        }
        if !tools.is_empty() {
            payload["tools"] = Self::declarations(tools);
        }

        tracing::debug!(model = %self.model, messages = messages.len(), "gemini request");
        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint.trim_end_matches('/'),
                self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| PipelineError::LanguageModel(format!("Gemini request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "gemini"));
        }

        let parsed: GeminiResponse = resp.json().await.map_err(|err| {
            PipelineError::LanguageModel(format!("Gemini response parse error: {err}"))
        })?;

        let parts = parsed
            .candidates
            .into_iter()
            .next()
            .map(|cand| cand.content.parts)
            .unwrap_or_default();

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: None,
                    name: call.name,
                    arguments: call.args,
                });
            } else if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
        }

        Ok(ModelCompletion {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        })
    }
}

/// A deterministic model used for tests and demos.
///
/// Each call pops the next scripted response. Responses shaped like
/// `{"action":"respond","content":..}` or
/// `{"action":"call_tool","name":..,"arguments":..}` are decoded; anything else
/// is returned verbatim as the reply.
#[derive(Default)]
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("stub model poisoned")
            .push_back(response.into());
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().expect("stub model poisoned").clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("stub model poisoned").len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _tools: &[ToolDescription],
        _stream: bool,
    ) -> Result<ModelCompletion> {
        self.requests
            .lock()
            .expect("stub model poisoned")
            .push(messages.to_vec());
        let raw = self
            .responses
            .lock()
            .expect("stub model poisoned")
            .pop_front()
            .ok_or_else(|| {
                PipelineError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: None,
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gemini_at(uri: String) -> GeminiClient {
        GeminiClient::from_config(&ModelConfig {
            provider: "gemini".into(),
            model: "gemini-2.5-flash".into(),
            api_key: Some("test-key".into()),
            base_url: Some(uri),
        })
        .unwrap()
    }

    fn weather_tool() -> ToolDescription {
        ToolDescription {
            name: "get_weather".into(),
            description: "Weather for a city".into(),
            parameters: Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})),
        }
    }

    #[tokio::test]
    async fn stub_decodes_directives_and_records_requests() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"get_weather","arguments":{"city":"Sydney"}}"#.into(),
            "plain reply".into(),
        ]);

        let first = model
            .complete_chat(&[Message::user("weather?")], &[], false)
            .await
            .unwrap();
        assert_eq!(first.tool_calls[0].name, "get_weather");
        assert!(first.content.is_none());

        let second = model.complete_chat(&[], &[], false).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("plain reply"));

        assert!(model.complete_chat(&[], &[], false).await.is_err());
        assert_eq!(model.requests().len(), 3);
        assert_eq!(model.requests()[0][0].content, "weather?");
    }

    #[test]
    fn gemini_contents_map_tool_traffic() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::tool_call(ToolCall {
                id: None,
                name: "get_weather".into(),
                arguments: json!({"city": "Sydney"}),
            }),
            Message::tool_with_call("get_weather", json!("sunny"), None),
        ];

        let contents = GeminiClient::to_contents(&messages);
        let encoded = serde_json::to_value(&contents).unwrap();

        assert_eq!(contents.len(), 3);
        assert_eq!(encoded[0]["parts"][0]["text"], "hi");
        assert_eq!(encoded[1]["role"], "model");
        assert_eq!(encoded[1]["parts"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(
            encoded[2]["parts"][0]["functionResponse"]["response"]["result"],
            "sunny"
        );
        assert!(GeminiClient::system_instruction(&messages).is_some());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let cfg = ModelConfig {
            provider: "carrier-pigeon".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(build_model(&cfg), Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn gemini_decodes_function_calls_and_joins_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "tools": [{"functionDeclarations": [{"name": "get_weather"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Checking "},
                            {"functionCall": {"name": "get_weather", "args": {"city": "Sydney"}}},
                            {"text": "now."}
                        ]
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = gemini_at(server.uri());
        let completion = client
            .complete_chat(
                &[Message::system("be brief"), Message::user("weather in Sydney?")],
                &[weather_tool()],
                false,
            )
            .await
            .unwrap();

        assert_eq!(completion.content.as_deref(), Some("Checking now."));
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "get_weather");
        assert_eq!(completion.tool_calls[0].arguments, json!({"city": "Sydney"}));
        assert!(completion.tool_calls[0].id.is_none());
    }

    #[tokio::test]
    async fn gemini_without_candidates_returns_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let completion = gemini_at(server.uri())
            .complete_chat(&[Message::user("hi")], &[], false)
            .await
            .unwrap();

        assert!(completion.content.is_none());
        assert!(completion.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn gemini_rate_limits_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exhausted"))
            .mount(&server)
            .await;

        let err = gemini_at(server.uri())
            .complete_chat(&[Message::user("hi")], &[], false)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "language model error: gemini rate limit exceeded: quota exhausted"
        );
    }

    #[tokio::test]
    async fn gemini_server_errors_carry_the_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = gemini_at(server.uri())
            .complete_chat(&[Message::user("hi")], &[], false)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::LanguageModel(ref msg)
            if msg.contains("500") && msg.ends_with("boom")));
    }

    #[test]
    fn gemini_requires_an_api_key() {
        let cfg = ModelConfig {
            provider: "gemini".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(
            GeminiClient::from_config(&cfg),
            Err(PipelineError::LanguageModel(_))
        ));
    }
}
