use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use base64::{engine::general_purpose, Engine as _};
use reqwest::multipart::{Form, Part};
use std::fmt::Debug;
use url::Url;

use crate::core::config::Config;
use crate::core::state::AspectRatio;
use crate::utils::imaging::split_data_uri;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_text_model")]
    pub text_model: String,
    #[serde(default = "default_gemini_image_model")]
    pub image_model: String,
    /// Reasoning token budget; 0 disables thinking, None leaves the model default.
    #[serde(default)]
    pub thinking_budget: Option<i32>,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    #[serde(default = "default_openai_text_model")]
    pub text_model: String,
    #[serde(default = "default_openai_image_model")]
    pub image_model: String,
    pub base_url: Option<String>,
}

impl GeminiConfig {
    pub fn with_key(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            text_model: default_gemini_text_model(),
            image_model: default_gemini_image_model(),
            thinking_budget: None,
            base_url: default_gemini_base_url(),
        }
    }
}

impl OpenAIConfig {
    pub fn with_key(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            text_model: default_openai_text_model(),
            image_model: default_openai_image_model(),
            base_url: None,
        }
    }
}

fn default_gemini_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_gemini_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_openai_text_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_image_model() -> String {
    "gpt-image-1".to_string()
}

/// Receives streamed text fragments as they arrive.
pub type OnChunk<'a> = dyn for<'c> FnMut(&'c str) + Send + 'a;

/// Boundary to the hosted generation API. Every call is a single attempt.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;

    /// Streams the completion, handing each text fragment to `on_chunk`, and
    /// returns the full text.
    async fn stream_chat(
        &self,
        system: &str,
        user: &str,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String> {
        let text = self.chat(system, user).await?;
        on_chunk(&text);
        Ok(text)
    }

    /// Structured output constrained by a JSON schema. Invalid JSON is an error.
    async fn generate_json(&self, system: &str, user: &str, _schema: &Value) -> Result<Value> {
        let raw = self.chat(system, user).await?;
        parse_json_response(&raw)
    }

    /// Returns a `data:` URI.
    async fn generate_image(&self, _prompt: &str, _aspect: AspectRatio) -> Result<String> {
        bail!("Image generation is not supported by this provider")
    }

    /// Edits the image in `image_data_uri` following `prompt`; returns a `data:` URI.
    async fn edit_image(&self, _prompt: &str, _image_data_uri: &str, _aspect: AspectRatio) -> Result<String> {
        bail!("Image editing is not supported by this provider")
    }
}

pub fn create_llm(config: &Config) -> Result<Box<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiClient::new(cfg.clone())))
        }
        "openai" => {
            let cfg = config.llm.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIClient::new(cfg.clone())))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

pub fn parse_json_response(raw: &str) -> Result<Value> {
    let clean = strip_code_blocks(raw);
    serde_json::from_str(&clean).with_context(|| format!("Failed to parse model JSON: {}", clean))
}

/// Reassembles `data:` payloads from a server-sent-event byte stream whose
/// chunks may split lines anywhere.
#[derive(Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Only complete lines are decoded, so a multibyte character split across
    /// chunks survives intact.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_field(&line) {
                events.push(data);
            }
        }
        events
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_field(&rest)
    }
}

fn data_field(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    line.trim()
        .strip_prefix("data:")
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

async fn read_sse<F>(resp: reqwest::Response, mut on_event: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let mut stream = resp.bytes_stream();
    let mut decoder = SseDecoder::default();
    while let Some(item) = stream.next().await {
        let chunk = item.context("Stream error")?;
        for event in decoder.push(&chunk) {
            on_event(&event)?;
        }
    }
    if let Some(event) = decoder.finish() {
        on_event(&event)?;
    }
    Ok(())
}

// --- Gemini ---
#[derive(Debug)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config: GeminiConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str, method: &str, sse: bool) -> Result<Url> {
        let base = format!("{}/models/{}:{}", self.config.base_url, model, method);
        let mut params = vec![("key", self.config.api_key.as_str())];
        if sse {
            params.push(("alt", "sse"));
        }
        Ok(Url::parse_with_params(&base, &params)?)
    }

    fn text_request(&self, system: &str, user: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::text(user)],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart::text(system)],
            }),
            generation_config: Some(GenerationConfig {
                thinking_config: self
                    .config
                    .thinking_budget
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
                ..Default::default()
            }),
        }
    }

    async fn post(&self, url: Url, body: &GeminiRequest) -> Result<GeminiResponse> {
        let resp = self.client.post(url).json(body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => return Err(anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)),
        };
        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }
        Ok(result)
    }

    async fn image_request(&self, parts: Vec<GeminiPart>, aspect: AspectRatio) -> Result<String> {
        let url = self.endpoint(&self.config.image_model, "generateContent", false)?;
        let body = GeminiRequest {
            contents: vec![GeminiContent { role: "user".to_string(), parts }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["IMAGE".to_string()]),
                image_config: Some(ImageConfig { aspect_ratio: aspect.as_str().to_string() }),
                ..Default::default()
            }),
        };
        debug!("Gemini image request ({}, {})", self.config.image_model, aspect);
        let result = self.post(url, &body).await?;
        result.first_image()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(default, skip_serializing)]
    thought: bool,
}

impl GeminiPart {
    fn text(text: &str) -> Self {
        Self { text: Some(text.to_string()), ..Default::default() }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: i32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    /// Concatenated non-thought text of the first candidate, if any.
    fn text(&self) -> Option<String> {
        let first = self.candidates.as_ref()?.first()?;
        let parts = &first.content.as_ref()?.parts;
        let text: String = parts
            .iter()
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn finish_reason(&self) -> &str {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or("UNKNOWN")
    }

    fn first_image(&self) -> Result<String> {
        let image = self
            .candidates
            .iter()
            .flatten()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.inline_data.as_ref());
        match image {
            Some(data) => Ok(format!("data:{};base64,{}", data.mime_type, data.data)),
            None => Err(anyhow!("Gemini returned no image. Finish reason: {}", self.finish_reason())),
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = self.endpoint(&self.config.text_model, "generateContent", false)?;
        let body = self.text_request(system, user);
        debug!("Gemini chat request ({} chars)", user.len());

        let result = self.post(url, &body).await?;
        match result.text() {
            Some(text) => Ok(text),
            None => Err(anyhow!("Gemini response empty. Finish reason: {}", result.finish_reason())),
        }
    }

    async fn stream_chat(
        &self,
        system: &str,
        user: &str,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String> {
        let url = self.endpoint(&self.config.text_model, "streamGenerateContent", true)?;
        let body = self.text_request(system, user);
        debug!("Gemini stream request ({} chars)", user.len());

        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let mut full = String::new();
        read_sse(resp, |event| {
            let chunk: GeminiResponse = serde_json::from_str(event)
                .with_context(|| format!("Failed to parse Gemini stream chunk: {}", event))?;
            if let Some(err) = chunk.error {
                return Err(anyhow!("Gemini API returned error: {}", err.message));
            }
            if let Some(text) = chunk.text() {
                on_chunk(&text);
                full.push_str(&text);
            }
            Ok(())
        })
        .await?;

        if full.is_empty() {
            bail!("Gemini stream ended without text");
        }
        Ok(full)
    }

    async fn generate_json(&self, system: &str, user: &str, schema: &Value) -> Result<Value> {
        let url = self.endpoint(&self.config.text_model, "generateContent", false)?;
        let mut body = self.text_request(system, user);
        if let Some(cfg) = body.generation_config.as_mut() {
            cfg.response_mime_type = Some("application/json".to_string());
            cfg.response_schema = Some(schema.clone());
        }

        let result = self.post(url, &body).await?;
        let text = result
            .text()
            .ok_or_else(|| anyhow!("Gemini response empty. Finish reason: {}", result.finish_reason()))?;
        parse_json_response(&text)
    }

    async fn generate_image(&self, prompt: &str, aspect: AspectRatio) -> Result<String> {
        self.image_request(vec![GeminiPart::text(prompt)], aspect).await
    }

    async fn edit_image(&self, prompt: &str, image_data_uri: &str, aspect: AspectRatio) -> Result<String> {
        let (mime_type, data) = split_data_uri(image_data_uri)
            .context("Source image must be a base64 data URI")?;
        let parts = vec![
            GeminiPart {
                inline_data: Some(InlineData { mime_type: mime_type.to_string(), data: data.to_string() }),
                ..Default::default()
            },
            GeminiPart::text(prompt),
        ];
        self.image_request(parts, aspect).await
    }
}

// --- OpenAI ---

#[derive(Debug)]
pub struct OpenAIClient {
    config: OpenAIConfig,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(config: OpenAIConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        Self { config, base_url, client: reqwest::Client::new() }
    }

    fn messages(system: &str, user: &str) -> Vec<OpenAIMessage> {
        vec![
            OpenAIMessage { role: "system".to_string(), content: system.to_string() },
            OpenAIMessage { role: "user".to_string(), content: user.to_string() },
        ]
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }
        Ok(resp)
    }

    async fn complete(&self, request: &OpenAIRequest) -> Result<String> {
        let result: OpenAIResponse = self.post("chat/completions", request).await?.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }
        Err(anyhow!("OpenAI response empty or missing content"))
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIImageResponse {
    data: Vec<OpenAIImage>,
}

#[derive(Deserialize)]
struct OpenAIImage {
    b64_json: Option<String>,
}

fn openai_image_size(aspect: AspectRatio) -> &'static str {
    match aspect {
        AspectRatio::Square => "1024x1024",
        AspectRatio::Portrait | AspectRatio::Tall => "1024x1536",
        AspectRatio::Landscape | AspectRatio::Wide => "1536x1024",
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = OpenAIRequest {
            model: self.config.text_model.clone(),
            messages: Self::messages(system, user),
            stream: false,
            response_format: None,
        };
        self.complete(&request).await
    }

    async fn stream_chat(
        &self,
        system: &str,
        user: &str,
        on_chunk: &mut OnChunk<'_>,
    ) -> Result<String> {
        let request = OpenAIRequest {
            model: self.config.text_model.clone(),
            messages: Self::messages(system, user),
            stream: true,
            response_format: None,
        };
        let resp = self.post("chat/completions", &request).await?;

        let mut full = String::new();
        read_sse(resp, |event| {
            if event == "[DONE]" {
                return Ok(());
            }
            let chunk: OpenAIStreamChunk = serde_json::from_str(event)
                .with_context(|| format!("Failed to parse OpenAI stream chunk: {}", event))?;
            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    on_chunk(&text);
                    full.push_str(&text);
                }
            }
            Ok(())
        })
        .await?;
        Ok(full)
    }

    async fn generate_json(&self, system: &str, user: &str, schema: &Value) -> Result<Value> {
        let request = OpenAIRequest {
            model: self.config.text_model.clone(),
            messages: Self::messages(system, user),
            stream: false,
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema }
            })),
        };
        let raw = self.complete(&request).await?;
        parse_json_response(&raw)
    }

    async fn generate_image(&self, prompt: &str, aspect: AspectRatio) -> Result<String> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": prompt,
            "size": openai_image_size(aspect),
            "n": 1,
        });
        debug!("OpenAI image request ({}, {})", self.config.image_model, aspect);
        let result: OpenAIImageResponse = self.post("images/generations", &body).await?.json().await?;
        result
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .map(|b64| format!("data:image/png;base64,{}", b64))
            .ok_or_else(|| anyhow!("OpenAI returned no image data"))
    }

    async fn edit_image(&self, prompt: &str, image_data_uri: &str, aspect: AspectRatio) -> Result<String> {
        let (mime, payload) = split_data_uri(image_data_uri).context("Source image is not a data URI")?;
        let bytes = general_purpose::STANDARD.decode(payload).context("Invalid base64 image")?;
        let ext = mime.rsplit('/').next().unwrap_or("png");
        let image = Part::bytes(bytes).file_name(format!("image.{}", ext)).mime_str(mime)?;
        let form = Form::new()
            .text("model", self.config.image_model.clone())
            .text("prompt", prompt.to_string())
            .text("size", openai_image_size(aspect))
            .part("image", image);

        debug!("OpenAI image edit ({}, {})", self.config.image_model, aspect);
        let resp = self
            .client
            .post(format!("{}/images/edits", self.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }
        let result: OpenAIImageResponse = resp.json().await?;
        result
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .map(|b64| format!("data:image/png;base64,{}", b64))
            .ok_or_else(|| anyhow!("OpenAI returned no image data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_parse_json_response_rejects_garbage() {
        assert!(parse_json_response("```json\n{\"a\": 1}\n```").is_ok());
        assert!(parse_json_response("Sure! Here are your tiles").is_err());
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(result.text().is_none());
        assert_eq!(result.finish_reason(), "SAFETY");
        assert!(result.first_image().is_err());
    }

    #[test]
    fn test_gemini_response_skips_thought_parts() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "thinking...", "thought": true },
                            { "text": "Hello " },
                            { "text": "world" }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.text().as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_gemini_response_inline_image() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "Here you go" },
                            { "inlineData": { "mimeType": "image/png", "data": "iVBORw0" } }
                        ]
                    }
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.first_image().unwrap(), "data:image/png;base64,iVBORw0");
    }

    #[test]
    fn test_gemini_request_serialization() {
        let client = GeminiClient::new(GeminiConfig {
            api_key: "k".to_string(),
            text_model: "m".to_string(),
            image_model: "i".to_string(),
            thinking_budget: Some(0),
            base_url: "https://example.com/v1beta/".to_string(),
        });
        let body = serde_json::to_value(client.text_request("sys", "hi")).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert!(body["contents"][0]["parts"][0].get("thought").is_none());

        let url = client.endpoint("m", "streamGenerateContent", true).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/v1beta/models/m:streamGenerateContent?key=k&alt=sse"
        );
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello there, how may I assist you today?"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("Hello there, how may I assist you today?")
        );
    }

    #[test]
    fn test_openai_request_omits_stream_when_false() {
        let request = OpenAIRequest {
            model: "m".to_string(),
            messages: OpenAIClient::messages("s", "u"),
            stream: false,
            response_format: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("stream").is_none());
        assert_eq!(body["messages"][1]["content"], "u");
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\nda"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.push(b"ta: [DONE]\n"), vec!["[DONE]".to_string()]);
        assert!(decoder.push(b": keep-alive comment\n").is_empty());
        decoder.push(b"data: tail");
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_chars_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: caf\xc3").is_empty());
        assert_eq!(decoder.push(b"\xa9 \xe2\x80"), Vec::<String>::new());
        assert_eq!(decoder.push(b"\x94 done\n"), vec!["caf\u{e9} \u{2014} done".to_string()]);
    }

    #[derive(Debug)]
    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn chat(&self, _system: &str, user: &str) -> Result<String> {
            Ok(format!("echo: {}", user))
        }
    }

    #[tokio::test]
    async fn test_default_stream_chat_hands_whole_reply_to_callback() -> Result<()> {
        let mut received = String::new();
        let text = EchoClient
            .stream_chat("system", "hello", &mut |chunk: &str| received.push_str(chunk))
            .await?;
        assert_eq!(text, "echo: hello");
        assert_eq!(received, text);
        Ok(())
    }

    #[test]
    fn test_openai_image_sizes_follow_orientation() {
        assert_eq!(openai_image_size(AspectRatio::Tall), "1024x1536");
        assert_eq!(openai_image_size(AspectRatio::Wide), "1536x1024");
        assert_eq!(openai_image_size(AspectRatio::Square), "1024x1024");
    }
}
