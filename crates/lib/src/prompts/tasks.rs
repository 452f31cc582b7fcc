//! # Default Task Prompts
//!
//! The default, hardcoded prompt templates for every LLM task. These are
//! loaded programmatically and can be overridden per task via configuration.

// --- Post Tagging ---
pub const TAGGING_SYSTEM_PROMPT: &str = r#"You are an expert content tagger for Telegram channel posts. Extract short topical tags from the post.
Rules:
1. Return ONLY a valid JSON array of strings, e.g. ["криптовалюта", "новости"]. No other text or explanations.
2. Tags must be lowercase, in the language of the post (Russian posts get Russian tags).
3. Return between 0 and 15 tags. An empty array is a valid answer for contentless posts.
4. Prefer specific topics over generic ones ("ставка цб" over "экономика" when both apply)."#;
pub const TAGGING_USER_PROMPT: &str = r#"# Post:
{post_text}"#;

// --- RAG Synthesis ---
pub const RAG_SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a strict, factual assistant. Answer the user's question based *only* on the provided #Context, which consists of posts from the user's own Telegram channels. Answer in the language of the question. If the context does not contain the answer, say so plainly."#;
pub const RAG_SYNTHESIS_USER_PROMPT: &str = r#"# User Question
{prompt}
# Context
{context}
# Your Answer:"#;

// --- Topic extraction for query history ---
pub const QUERY_TOPICS_SYSTEM_PROMPT: &str = r#"You are a query analyst. Extract the key topics from the user's question. Respond ONLY with a valid JSON array of lowercase topic strings. Do not include any other text."#;
pub const QUERY_TOPICS_USER_PROMPT: &str = r#"# USER QUERY:
{prompt}"#;

// --- Digest: topic agent (conservative) ---
pub const DIGEST_TOPICS_SYSTEM_PROMPT: &str = r#"You are a conversation analyst. Identify the main discussion topics in the group chat transcript. Respond ONLY with a valid JSON array of short topic strings, most prominent first, at most 10 items."#;
pub const DIGEST_TOPICS_USER_PROMPT: &str = r#"# Transcript:
{transcript}"#;

// --- Digest: emotion agent (creative) ---
pub const DIGEST_EMOTIONS_SYSTEM_PROMPT: &str = r#"You are a conversation analyst. Describe the emotional tone of the group chat transcript in one or two sentences, in the language of the transcript. Respond with plain text only."#;
pub const DIGEST_EMOTIONS_USER_PROMPT: &str = r#"# Transcript:
{transcript}"#;

// --- Digest: speaker roles agent (creative) ---
pub const DIGEST_ROLES_SYSTEM_PROMPT: &str = r#"You are a conversation analyst. For each active participant, summarise their role in the discussion in a few words. Respond ONLY with a valid JSON object mapping speaker name to role description. Do not include any other text."#;
pub const DIGEST_ROLES_USER_PROMPT: &str = r#"# Transcript:
{transcript}"#;

// --- Digest: synthesis agent ---
pub const DIGEST_SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a digest writer. Produce a concise summary of the group conversation using the transcript and the analyst notes. Write in the language of the transcript. Use short paragraphs and Markdown bullets for distinct threads. Do not invent content that is not in the transcript."#;
pub const DIGEST_SYNTHESIS_USER_PROMPT: &str = r#"# Topics:
{topics}
# Tone:
{emotions}
# Transcript:
{transcript}"#;

// --- Mention analysis ---
pub const MENTION_SYSTEM_PROMPT: &str = r#"You are an assistant triaging a mention of the user in a group chat. Given the surrounding messages, explain why the user was mentioned and how urgent a reaction is.
Respond ONLY with a valid JSON object: {"reason": "<one sentence in the language of the chat>", "urgency": "<urgent|important|normal>"}. Do not include any other text."#;
pub const MENTION_USER_PROMPT: &str = r#"# Mentioned user: @{username}
# Surrounding messages:
{context}"#;
