use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::{AnswerError, BoxFragmentStream, Fragment, TextGenerator};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            top_p: 0.95,
            top_k: 64,
        }
    }
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Longest gap allowed between reads; a long answer may stream for longer.
    pub timeout: Duration,
    pub generation: GenerationConfig,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("generation", &self.generation)
            .finish()
    }
}

impl GeminiConfig {
    /// Read `GEMINI_*` settings. Only the API key is required.
    pub fn from_env() -> Result<Self, AnswerError> {
        let api_key = dotenv::var("GEMINI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AnswerError::ServiceUnavailable("GEMINI_API_KEY is not set".to_string())
            })?;
        let base_url =
            dotenv::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = dotenv::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_secs = dotenv::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            api_key,
            base_url,
            model,
            timeout: Duration::from_secs(timeout_secs),
            generation: GenerationConfig::default(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Streams answers from the Gemini `streamGenerateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, AnswerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| {
                AnswerError::ServiceUnavailable(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            base, self.config.model
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        system_directive: &str,
    ) -> Result<BoxFragmentStream, AnswerError> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: system_directive,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: prompt }],
            }],
            generation_config: self.config.generation,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnswerError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, model = %self.config.model, "Gemini rejected request");
            return Err(AnswerError::RequestFailed(format!(
                "{} {}",
                status,
                error_detail(&text)
            )));
        }

        debug!(model = %self.config.model, "Gemini stream opened");
        Ok(decode_stream(resp.bytes_stream()))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Pull the API's error message out of a JSON error body, else return the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => env.error.message,
        Err(_) => body.chars().take(300).collect::<String>().trim().to_string(),
    }
}

/// Parse one SSE `data:` payload. `Ok(None)` means the chunk carried no text.
fn parse_chunk(data: &str) -> Result<Option<String>, AnswerError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| AnswerError::StreamInterrupted(format!("malformed chunk: {}", e)))?;

    if let Some(err) = chunk.error {
        return Err(AnswerError::StreamInterrupted(err.message));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

/// Queue fragments decoded from SSE payloads. Returns false once an error is queued.
fn queue_events(pending: &mut VecDeque<Fragment>, events: Vec<String>) -> bool {
    for data in events {
        match parse_chunk(&data) {
            Ok(Some(text)) => pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(e) => {
                pending.push_back(Err(e));
                return false;
            }
        }
    }
    true
}

/// Turn a raw SSE byte stream into text fragments. The first error ends the stream.
pub(crate) fn decode_stream<S, B, E>(body: S) -> BoxFragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = (
        Box::pin(body),
        SseDecoder::default(),
        VecDeque::<Fragment>::new(),
        false,
    );

    futures::stream::unfold(state, |(mut body, mut decoder, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (body, decoder, pending, done)));
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => {
                    let events = decoder.push(chunk.as_ref());
                    done = !queue_events(&mut pending, events);
                }
                Some(Err(e)) => {
                    pending.push_back(Err(AnswerError::StreamInterrupted(e.to_string())));
                    done = true;
                }
                None => {
                    let events = decoder.finish();
                    queue_events(&mut pending, events);
                    done = true;
                }
            }
        }
    })
    .boxed()
}
