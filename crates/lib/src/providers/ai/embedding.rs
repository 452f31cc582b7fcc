//! # Embeddings Provider
//!
//! Generates dense vectors by calling an external embeddings API. The
//! payload shape is chosen from the URL: Gemini endpoints get the Gemini
//! content envelope, everything else is treated as OpenAI-compatible.

use crate::errors::ProviderError;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize, Debug)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

// --- Gemini-specific request and response structures ---

#[derive(Serialize, Debug)]
struct GeminiEmbeddingRequest<'a> {
    model: String,
    content: GeminiEmbeddingContent<'a>,
}

#[derive(Serialize, Debug)]
struct GeminiEmbeddingContent<'a> {
    parts: Vec<GeminiEmbeddingPart<'a>>,
}

#[derive(Serialize, Debug)]
struct GeminiEmbeddingPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GeminiEmbeddingResponse {
    embedding: GeminiEmbeddingValue,
}

#[derive(Deserialize, Debug)]
struct GeminiEmbeddingValue {
    values: Vec<f32>,
}

/// Generates a vector embedding for a given text input using an external
/// API, with an explicit request timeout.
pub async fn generate_embedding(
    api_url: &str,
    model: &str,
    input: &str,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Vec<f32>, ProviderError> {
    let client = ReqwestClient::builder()
        .timeout(timeout)
        .build()
        .map_err(ProviderError::ReqwestClientBuild)?;
    let mut request_builder = client.post(api_url);
    let is_gemini = api_url.contains("generativelanguage.googleapis.com");

    // --- 1. Construct the appropriate request body and apply auth ---
    if is_gemini {
        // Gemini requires the model name to be prefixed with "models/".
        let gemini_model_name = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };

        let request_body = GeminiEmbeddingRequest {
            model: gemini_model_name,
            content: GeminiEmbeddingContent {
                parts: vec![GeminiEmbeddingPart { text: input }],
            },
        };
        debug!(payload = ?request_body, "--> Sending request to Gemini Embeddings API");
        request_builder = request_builder.json(&request_body);
        if let Some(key) = api_key {
            // Gemini uses an `x-goog-api-key` header for embeddings.
            request_builder = request_builder.header("x-goog-api-key", key);
        }
    } else {
        let request_body = OpenAiEmbeddingRequest { model, input };
        debug!(payload = ?request_body, "--> Sending request to OpenAI-compatible Embeddings API");
        request_builder = request_builder.json(&request_body);
        if let Some(key) = api_key {
            request_builder = request_builder.bearer_auth(key);
        }
    }

    // --- 2. Send the request and handle the response ---
    let response = request_builder
        .send()
        .await
        .map_err(ProviderError::AiRequest)?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let error_text = response.text().await.unwrap_or_default();
        return Err(ProviderError::RateLimited(error_text));
    }
    if !response.status().is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(ProviderError::AiApi(error_text));
    }

    if is_gemini {
        let gemini_response: GeminiEmbeddingResponse = response
            .json()
            .await
            .map_err(ProviderError::AiDeserialization)?;
        Ok(gemini_response.embedding.values)
    } else {
        let openai_response: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(ProviderError::AiDeserialization)?;

        openai_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                ProviderError::AiApi("OpenAI-compatible API returned no embeddings".to_string())
            })
    }
}

/// Settings for the embedding provider, shared by the indexer and the
/// retrieval engine so queries are embedded exactly like documents.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl EmbeddingClient {
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let started = std::time::Instant::now();
        let result = generate_embedding(
            &self.api_url,
            &self.model,
            input,
            self.api_key.as_deref(),
            self.timeout,
        )
        .await;
        crate::metrics::record_embedding_latency(started.elapsed().as_secs_f64());
        result
    }
}
