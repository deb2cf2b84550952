//! Merge-conflict analyzer
//!
//! Context keys:
//! - `file_path` (required)
//! - `ours`, `theirs`: the two sides of the conflict, at least one non-empty
//! - `base`: common ancestor hunk, optional
//! - `branch`: branch being merged, optional

use std::fmt::Write as _;

use async_trait::async_trait;

use super::client::{ChatMessage, CompletionRequest};
use super::{context_str, truncate_chars, AiController, AnalysisContext, ControllerCore};
use crate::{IntelligenceError, Result};

const SYSTEM_PROMPT: &str = "You are a senior engineer resolving Git merge conflicts. \
Respond only with a JSON object with the keys resolution_strategy \
(one of \"ours\", \"theirs\", \"combine\", \"manual\"), confidence (0.0 to 1.0), \
summary (one sentence) and risks (array of strings).";

/// Per-side character budget
const MAX_SIDE_CHARS: usize = 6000;

/// Suggests a resolution strategy for one conflicted hunk
#[derive(Debug, Clone)]
pub struct ConflictAnalyzer {
    core: ControllerCore,
}

impl ConflictAnalyzer {
    /// Analyzer dispatching through `core`
    pub fn new(core: ControllerCore) -> Self {
        Self { core }
    }

    fn push_side(prompt: &mut String, label: &str, text: Option<&str>) {
        let (text, truncated) = truncate_chars(text.unwrap_or(""), MAX_SIDE_CHARS);
        let _ = writeln!(prompt, "<{label}>\n{text}\n</{label}>");
        if truncated {
            let _ = writeln!(prompt, "({label} truncated to {MAX_SIDE_CHARS} characters)");
        }
    }
}

#[async_trait]
impl AiController for ConflictAnalyzer {
    fn name(&self) -> &str {
        "conflict_analyzer"
    }

    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn build_request(&self, context: &AnalysisContext) -> Result<CompletionRequest> {
        let file_path = context_str(context, "file_path").ok_or_else(|| {
            IntelligenceError::InvalidContext("conflict context requires file_path".to_string())
        })?;

        let ours = context_str(context, "ours");
        let theirs = context_str(context, "theirs");
        if ours.is_none() && theirs.is_none() {
            return Err(IntelligenceError::InvalidContext(format!(
                "conflict in {file_path} has no content on either side"
            )));
        }

        let mut prompt = format!("File: {file_path}\n");
        if let Some(branch) = context_str(context, "branch") {
            let _ = writeln!(prompt, "Incoming branch: {branch}");
        }
        if let Some(base) = context_str(context, "base") {
            Self::push_side(&mut prompt, "base", Some(base));
        }
        Self::push_side(&mut prompt, "ours", ours);
        Self::push_side(&mut prompt, "theirs", theirs);
        prompt.push_str("Recommend how to resolve this conflict.");

        Ok(CompletionRequest {
            model: self.core.model().to_string(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: self.core.temperature(),
            max_tokens: Some(512),
            json_response: true,
        })
    }
}
