//! # Prompt Template Modules
//!
//! All prompt templates used by the tagging, retrieval, digest and mention
//! pipelines. Templates use `{placeholder}` substitution and are loaded as
//! programmatic defaults that configuration may override per task.

pub mod tasks;
