//! Gemini `generateContent` client with the `filterPackets` tool registered.
//!
//! The chat is kept client-side: every request carries the retained
//! history followed by the new question.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Write;
use std::sync::Mutex;
use std::time::Duration;

use super::{Assistant, AssistantReply, TranslateError, Translator, FILTER_FUNCTION, STRING_PARAMETERS};
use crate::config::AssistantConfig;
use crate::packet::Packet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

impl Content {
    fn text(role: &str, text: String) -> Self {
        Content {
            role: Some(role.into()),
            parts: vec![Part {
                text: Some(text),
                ..Part::default()
            }],
        }
    }
}

/// Schema of the `filterPackets` function. `limit` is numeric, every other
/// parameter is a string.
pub fn filter_declaration() -> Value {
    let mut properties = Map::new();
    for name in STRING_PARAMETERS {
        properties.insert(name.into(), json!({ "type": "STRING" }));
    }
    properties.insert(
        "limit".into(),
        json!({ "type": "NUMBER", "description": "maximum number of packets to keep" }),
    );
    json!({
        "name": FILTER_FUNCTION,
        "description": "Filter the captured packets. Every argument is optional; \
                        string arguments are regular expressions or substrings.",
        "parameters": { "type": "OBJECT", "properties": properties },
    })
}

/// Pick the reply out of a decoded response: the first function call if any
/// part carries one, otherwise all text parts concatenated.
pub fn reply_from_response(response: GenerateResponse) -> Result<(Content, AssistantReply), TranslateError> {
    let content = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .filter(|c| !c.parts.is_empty())
        .ok_or(TranslateError::EmptyResponse)?;

    if let Some(call) = content.parts.iter().find_map(|p| p.function_call.as_ref()) {
        let reply = AssistantReply::Call {
            name: call.name.clone(),
            args: call.args.clone(),
        };
        return Ok((content, reply));
    }

    let text: String = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    Ok((content, AssistantReply::Text(text)))
}

/// Blocking Gemini chat session.
pub struct GeminiAssistant {
    client: Client,
    url: String,
    api_key: String,
    context_packets: usize,
    max_history: usize,
    /// Completed exchanges, oldest first. Each entry holds the user turn,
    /// the model turn and, after a function call, the function response.
    history: Mutex<Vec<Vec<Content>>>,
}

impl GeminiAssistant {
    /// Resolve credentials and build the HTTP client. No request is sent.
    pub fn connect(config: &AssistantConfig) -> Result<Self, TranslateError> {
        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    TranslateError::Init(format!("no API key set (checked ${})", config.api_key_env))
                })?,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| TranslateError::Init(e.to_string()))?;

        let url = format!(
            "{}/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        );
        tracing::debug!(%url, "gemini client configured");

        Ok(GeminiAssistant {
            client,
            url,
            api_key,
            context_packets: config.context_packets,
            max_history: config.max_history,
            history: Mutex::new(Vec::new()),
        })
    }

    /// A translator that connects lazily with `config`.
    pub fn translator(config: AssistantConfig) -> Translator {
        Translator::new(move || GeminiAssistant::connect(&config))
    }

    fn question(&self, prompt: &str, visible: &[Packet]) -> String {
        if self.context_packets == 0 || visible.is_empty() {
            return prompt.to_string();
        }
        let mut text = format!("{}\n\nCurrently visible packets:\n", prompt);
        for packet in visible.iter().take(self.context_packets) {
            let _ = writeln!(text, "{}", packet.summary());
        }
        if visible.len() > self.context_packets {
            let _ = writeln!(text, "... and {} more", visible.len() - self.context_packets);
        }
        text
    }

    fn send(&self, contents: &[Content]) -> Result<GenerateResponse, TranslateError> {
        let body = json!({
            "contents": contents,
            "tools": [{ "functionDeclarations": [filter_declaration()] }],
        });

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| TranslateError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(TranslateError::Transport(format!(
                "HTTP {}: {}",
                status,
                detail.trim()
            )));
        }

        response
            .json::<GenerateResponse>()
            .map_err(|e| TranslateError::Protocol(e.to_string()))
    }

    fn remember(&self, exchange: Vec<Content>) {
        let mut history = self.history.lock().unwrap();
        history.push(exchange);
        let excess = history.len().saturating_sub(self.max_history);
        history.drain(..excess);
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl Assistant for GeminiAssistant {
    fn ask(&self, prompt: &str, visible: &[Packet]) -> Result<AssistantReply, TranslateError> {
        let user = Content::text("user", self.question(prompt, visible));

        let mut contents: Vec<Content> = self.history.lock().unwrap().concat();
        contents.push(user.clone());

        tracing::debug!(turns = contents.len(), "sending question to gemini");
        let response = self.send(&contents)?;
        let (mut model, reply) = reply_from_response(response)?;
        model.role = Some("model".into());

        let mut exchange = vec![user, model];
        if let AssistantReply::Call { name, .. } = &reply {
            exchange.push(Content {
                role: Some("function".into()),
                parts: vec![Part {
                    function_response: Some(FunctionResponse {
                        name: name.clone(),
                        response: json!({ "result": "filter applied" }),
                    }),
                    ..Part::default()
                }],
            });
        }
        self.remember(exchange);

        Ok(reply)
    }
}
