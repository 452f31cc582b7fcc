//! # Link Enrichment
//!
//! Posts frequently carry links whose content matters more than the post
//! text itself. Before tagging, the first few URLs of a post are fetched
//! and their readable text (HTML converted to Markdown) is appended to form
//! the post's `enriched_text`. Every failure degrades gracefully to the
//! original text; enrichment never blocks the pipeline.

use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// URLs examined per post.
const MAX_LINKS_PER_POST: usize = 3;
/// Extracted content is truncated per link to keep chunks focused.
const MAX_EXTRACT_CHARS: usize = 4_000;

/// Extracts up to [`MAX_LINKS_PER_POST`] http(s) URLs from a post body.
pub fn extract_urls(text: &str) -> Vec<String> {
    let re = Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("static regex");
    re.find_iter(text)
        .take(MAX_LINKS_PER_POST)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .collect()
}

/// Fetches a URL and converts its HTML to readable Markdown.
async fn fetch_readable(url: &str, timeout: Duration) -> Option<String> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
    let response = match client.get(url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            debug!(url, status = %r.status(), "enrichment fetch returned non-success");
            return None;
        }
        Err(e) => {
            debug!(url, error = %e, "enrichment fetch failed");
            return None;
        }
    };
    let html = response.text().await.ok()?;
    match htmd::convert(&html) {
        Ok(markdown) => {
            let cleaned = markdown.trim();
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned.chars().take(MAX_EXTRACT_CHARS).collect())
            }
        }
        Err(e) => {
            warn!(url, error = %e, "HTML conversion failed");
            None
        }
    }
}

/// Builds the enriched text of a post: the original body plus the readable
/// content of its links. Returns `None` when no link yielded content, so
/// callers can leave `enriched_text` unset.
pub async fn enrich_post_text(text: &str, timeout: Duration) -> Option<String> {
    let urls = extract_urls(text);
    if urls.is_empty() {
        return None;
    }

    let mut sections = Vec::new();
    for url in &urls {
        if let Some(content) = fetch_readable(url, timeout).await {
            sections.push(format!("--- {url} ---\n{content}"));
        }
    }
    if sections.is_empty() {
        return None;
    }
    Some(format!("{text}\n\n{}", sections.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bounded_urls() {
        let text = "a https://a.example/x, b http://b.example/y. \
                    c https://c.example/z d https://d.example/w";
        let urls = extract_urls(text);
        assert_eq!(urls.len(), MAX_LINKS_PER_POST);
        assert_eq!(urls[0], "https://a.example/x");
        assert_eq!(urls[1], "http://b.example/y");
    }

    #[test]
    fn no_urls_no_enrichment() {
        assert!(extract_urls("plain text post").is_empty());
    }

    #[tokio::test]
    async fn unreachable_links_degrade_to_none() {
        // Reserved TEST-NET address: connection fails fast.
        let text = "see http://192.0.2.1/page";
        let enriched = enrich_post_text(text, Duration::from_millis(200)).await;
        assert!(enriched.is_none());
    }
}
