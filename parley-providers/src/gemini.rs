//! Gemini (Generative Language API) HTTP client

use async_trait::async_trait;
use parley_core::config::{GeminiConfig, GenerationConfig, HarmBlockThreshold};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::base::{ChatModel, ModelInfo, ProviderError, ProviderResult, Turn};
use crate::stream::FragmentStream;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const MODELS_PAGE_SIZE: &str = "100";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// generateContent request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    safety_settings: Vec<SafetySetting>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: HarmBlockThreshold,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    top_p: f32,
}

/// generateContent / streamGenerateContent response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

impl Candidate {
    fn text(&self) -> String {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<WireModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireModel {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl From<WireModel> for ModelInfo {
    fn from(model: WireModel) -> Self {
        Self {
            id: strip_model_prefix(&model.name).to_string(),
            display_name: model.display_name,
            description: model.description,
            supported_methods: model.supported_generation_methods,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

fn strip_model_prefix(name: &str) -> &str {
    name.strip_prefix("models/").unwrap_or(name)
}

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
    timeout: Option<Duration>,
}

impl GeminiClient {
    /// Create a new client. An empty key is rejected up front.
    pub fn new(api_key: impl Into<String>, api_base: Option<String>) -> ProviderResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential(
                "GEMINI_API_KEY environment variable not set".to_string(),
            ));
        }

        let api_base = api_base
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_base,
            api_key,
            timeout: None,
        })
    }

    /// Create a client from the `gemini` config section
    pub fn from_config(config: &GeminiConfig) -> ProviderResult<Self> {
        let mut client = Self::new(config.api_key.clone(), Some(config.api_base.clone()))?;
        if config.timeout_secs > 0 {
            client.timeout = Some(Duration::from_secs(config.timeout_secs));
        }
        Ok(client)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.api_base,
            strip_model_prefix(model),
            method
        )
    }

    fn build_request(contents: &[Turn], settings: &GenerationConfig) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: contents
                .iter()
                .map(|turn| Content {
                    role: Some(turn.role.as_str().to_string()),
                    parts: vec![Part {
                        text: Some(turn.text.clone()),
                    }],
                })
                .collect(),
            safety_settings: HARM_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: settings.safety_threshold,
                })
                .collect(),
            generation_config: WireGenerationConfig {
                max_output_tokens: settings.max_output_tokens,
                temperature: settings.temperature,
                top_p: settings.top_p,
            },
        }
    }

    fn post(&self, url: &str, body: &GenerateContentRequest) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
    }

    async fn error_from_response(response: Response) -> ProviderError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(body);
        ProviderError::Api {
            status: status.as_u16(),
            message,
        }
    }

    fn api_error(body: ErrorBody) -> ProviderError {
        ProviderError::Api {
            status: body.code.unwrap_or(500),
            message: body.message,
        }
    }

    /// Split complete SSE events off the front of `buffer`, returning their
    /// `data:` payloads.
    fn parse_sse_events(buffer: &mut String) -> Vec<String> {
        if buffer.contains('\r') {
            *buffer = buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = buffer.find("\n\n") {
            let raw = buffer[..pos].to_string();
            buffer.drain(..pos + 2);

            let data_lines: Vec<&str> = raw
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim)
                .collect();

            if !data_lines.is_empty() {
                events.push(data_lines.join("\n"));
            }
        }
        events
    }

    /// Decode the longest complete UTF-8 prefix of `pending`, keeping a
    /// trailing partial character for the next chunk.
    fn drain_utf8(pending: &mut Vec<u8>) -> String {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                let text = text.to_string();
                pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
                pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(pending).into_owned();
                pending.clear();
                text
            }
        }
    }
}

/// Outcome of one decoded stream event
enum StreamStep {
    Fragments(Vec<String>),
    NoCandidates(Option<String>),
}

fn decode_stream_event(payload: &str) -> ProviderResult<StreamStep> {
    let parsed: GenerateContentResponse = serde_json::from_str(payload)?;
    if let Some(error) = parsed.error {
        return Err(GeminiClient::api_error(error));
    }
    if parsed.candidates.is_empty() {
        return Ok(StreamStep::NoCandidates(
            parsed.prompt_feedback.and_then(|f| f.block_reason),
        ));
    }
    Ok(StreamStep::Fragments(
        parsed
            .candidates
            .iter()
            .map(Candidate::text)
            .filter(|text| !text.is_empty())
            .collect(),
    ))
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        let url = format!("{}/models", self.api_base);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .query(&[("pageSize", MODELS_PAGE_SIZE)]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            if let Some(timeout) = self.timeout {
                req = req.timeout(timeout);
            }

            let response = req.send().await?;
            if !response.status().is_success() {
                return Err(Self::error_from_response(response).await);
            }

            let page: ListModelsResponse = response.json().await?;
            models.extend(page.models.into_iter().map(ModelInfo::from));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} models", models.len());
        Ok(models)
    }

    async fn generate(
        &self,
        model: &str,
        contents: &[Turn],
        settings: &GenerationConfig,
    ) -> ProviderResult<String> {
        let url = self.model_url(model, "generateContent");
        let request = Self::build_request(contents, settings);

        debug!(
            "Sending generateContent request for {} with {} turns",
            model,
            contents.len()
        );

        let mut req = self.post(&url, &request);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let response = req.send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let parsed: GenerateContentResponse = response.json().await?;
        if let Some(error) = parsed.error {
            return Err(Self::api_error(error));
        }

        let candidate = parsed.candidates.first().ok_or_else(|| {
            ProviderError::EmptyCandidates {
                block_reason: parsed.prompt_feedback.and_then(|f| f.block_reason),
            }
        })?;
        Ok(candidate.text())
    }

    async fn stream_generate(
        &self,
        model: &str,
        contents: &[Turn],
        settings: &GenerationConfig,
        cancel: CancellationToken,
    ) -> ProviderResult<FragmentStream> {
        let url = self.model_url(model, "streamGenerateContent");
        let request = Self::build_request(contents, settings);

        debug!(
            "Sending streamGenerateContent request for {} with {} turns",
            model,
            contents.len()
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = self.post(&url, &request).query(&[("alt", "sse")]).send() => response?,
        };

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut response = response;
            let mut pending = Vec::new();
            let mut buffer = String::new();
            let mut saw_candidate = false;
            let mut block_reason: Option<String> = None;

            loop {
                let chunk = tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!("Stream reader stopped by cancellation");
                        return;
                    }
                    chunk = response.chunk() => chunk,
                };
                let chunk = match chunk {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx.send(Err(ProviderError::Http(err)));
                        return;
                    }
                };

                pending.extend_from_slice(&chunk);
                buffer.push_str(&Self::drain_utf8(&mut pending));

                for payload in Self::parse_sse_events(&mut buffer) {
                    match decode_stream_event(&payload) {
                        Ok(StreamStep::Fragments(fragments)) => {
                            saw_candidate = true;
                            for fragment in fragments {
                                if tx.send(Ok(fragment)).is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(StreamStep::NoCandidates(reason)) => {
                            if reason.is_some() {
                                block_reason = reason;
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            return;
                        }
                    }
                }
            }

            // A final event may arrive without its blank-line terminator.
            if !buffer.trim().is_empty() {
                buffer.push_str("\n\n");
                for payload in Self::parse_sse_events(&mut buffer) {
                    match decode_stream_event(&payload) {
                        Ok(StreamStep::Fragments(fragments)) => {
                            saw_candidate = true;
                            for fragment in fragments {
                                let _ = tx.send(Ok(fragment));
                            }
                        }
                        Ok(StreamStep::NoCandidates(reason)) => {
                            if reason.is_some() {
                                block_reason = reason;
                            }
                        }
                        Err(err) => {
                            warn!("Discarding malformed trailing stream event: {}", err);
                        }
                    }
                }
            }

            if !saw_candidate {
                let _ = tx.send(Err(ProviderError::EmptyCandidates { block_reason }));
            }
        });

        let fragments = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(FragmentStream::new(fragments, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> GeminiClient {
        GeminiClient::new("test-key", Some(server.url())).unwrap()
    }

    fn history() -> Vec<Turn> {
        vec![
            Turn::user("Be brief."),
            Turn::model("Understood."),
            Turn::user("What is Rust?"),
        ]
    }

    #[test]
    fn test_new_rejects_empty_key() {
        let err = GeminiClient::new("  ", None).err().unwrap();
        assert!(matches!(err, ProviderError::MissingCredential(_)));
    }

    #[test]
    fn test_from_config_trims_base() {
        let config = GeminiConfig {
            api_key: "k".to_string(),
            api_base: "https://example.test/v1beta/".to_string(),
            timeout_secs: 30,
        };
        let client = GeminiClient::from_config(&config).unwrap();
        assert_eq!(client.api_base(), "https://example.test/v1beta");
        assert_eq!(client.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_model_url_accepts_prefixed_names() {
        let client = GeminiClient::new("k", Some("https://example.test".to_string())).unwrap();
        assert_eq!(
            client.model_url("models/gemini-1.5-flash", "generateContent"),
            "https://example.test/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(
            client.model_url("gemini-1.5-flash", "generateContent"),
            "https://example.test/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(GeminiClient::build_request(
            &history(),
            &GenerationConfig::default(),
        ))
        .unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "What is Rust?");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_LOW_AND_ABOVE");
    }

    #[test]
    fn test_parse_sse_events_handles_crlf() {
        let mut buffer =
            "data: {\"a\":1}\r\n\r\ndata: {\"b\":2}\n\n: keep-alive\n\ntrailing".to_string();
        let events = GeminiClient::parse_sse_events(&mut buffer);
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        assert_eq!(buffer, "trailing");
    }

    #[test]
    fn test_drain_utf8_keeps_split_character() {
        let bytes = "héllo".as_bytes();
        let mut pending = bytes[..2].to_vec();
        assert_eq!(GeminiClient::drain_utf8(&mut pending), "h");
        assert_eq!(pending.len(), 1);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(GeminiClient::drain_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_generate_returns_first_candidate_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "Be brief."}]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Rust is "},{"text":"a language."}]},"finishReason":"STOP"}]}"#,
            )
            .create_async()
            .await;

        let text = client_for(&server)
            .generate("gemini-1.5-flash", &history(), &GenerationConfig::default())
            .await
            .unwrap();

        assert_eq!(text, "Rust is a language.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_without_candidates_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("gemini-1.5-flash", &history(), &GenerationConfig::default())
            .await
            .unwrap_err();

        match err {
            ProviderError::EmptyCandidates { block_reason } => {
                assert_eq!(block_reason.as_deref(), Some("SAFETY"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_api_error_uses_google_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
            )
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("gemini-1.5-flash", &history(), &GenerationConfig::default())
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_in_order() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo \"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"world\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"totalTokenCount\":9}}\r\n\r\n",
        );
        let mock = server
            .mock("POST", "/models/gemini-1.5-flash:streamGenerateContent")
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let stream = client_for(&server)
            .stream_generate(
                "gemini-1.5-flash",
                &history(),
                &GenerationConfig::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Hel", "lo ", "world"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_without_candidates_ends_with_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"promptFeedback\":{\"blockReason\":\"OTHER\"}}\r\n\r\n")
            .create_async()
            .await;

        let mut stream = client_for(&server)
            .stream_generate(
                "gemini-1.5-flash",
                &history(),
                &GenerationConfig::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        match stream.next().await {
            Some(Err(ProviderError::EmptyCandidates { block_reason })) => {
                assert_eq!(block_reason.as_deref(), Some("OTHER"));
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_reports_http_errors_before_streaming() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"Resource exhausted"}}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .stream_generate(
                "gemini-1.5-flash",
                &history(),
                &GenerationConfig::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Api { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_stream_cancelled_before_request() {
        let server = mockito::Server::new_async().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = client_for(&server)
            .stream_generate("gemini-1.5-flash", &history(), &GenerationConfig::default(), token)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn test_list_models_follows_pages_and_strips_prefix() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/models")
            .match_query(Matcher::Exact("pageSize=100".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"models":[{"name":"models/gemini-1.5-flash","displayName":"Gemini 1.5 Flash","supportedGenerationMethods":["generateContent","countTokens"]}],"nextPageToken":"page-2"}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/models")
            .match_query(Matcher::Exact("pageSize=100&pageToken=page-2".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"models":[{"name":"models/text-embedding-004","displayName":"Text Embedding 004","supportedGenerationMethods":["embedContent"]}]}"#,
            )
            .create_async()
            .await;

        let models = client_for(&server).list_models().await.unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gemini-1.5-flash");
        assert_eq!(models[0].label(), "Gemini 1.5 Flash");
        assert!(models[0].supports_generation());
        assert!(!models[1].supports_generation());
        first.assert_async().await;
        second.assert_async().await;
    }
}
