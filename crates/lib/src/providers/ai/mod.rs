pub mod embedding;
pub mod gemini;
pub mod local;

use crate::errors::ProviderError;
use async_trait::async_trait;
use dyn_clone::DynClone;
pub use embedding::generate_embedding;
use std::fmt::Debug;

/// A trait for interacting with an AI chat provider.
///
/// This defines the common interface the tagging, digest, mention and RAG
/// synthesis pipelines use to talk to different Large Language Models.
/// Temperature and model choice are properties of the provider instance, so
/// one task can hold a conservative provider while another holds a creative
/// one against the same vendor.
#[async_trait]
pub trait AiProvider: Send + Sync + Debug + DynClone {
    /// Generates a response from a given system and user prompt.
    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProviderError>;
}

dyn_clone::clone_trait_object!(AiProvider);

/// Strips a Markdown code fence from an LLM response, tolerating an optional
/// language tag. Providers are asked for bare JSON but routinely wrap it.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence(r#"["ai"]"#), r#"["ai"]"#);
        assert_eq!(strip_code_fence("```json\n[\"ai\"]\n```"), r#"["ai"]"#);
        assert_eq!(strip_code_fence("```\n[\"ai\"]\n```"), r#"["ai"]"#);
        assert_eq!(strip_code_fence("  [1, 2]  "), "[1, 2]");
    }
}
