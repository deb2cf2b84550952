//! Scores how likely an email's content is fabricated

use std::fmt::Write as _;

use async_trait::async_trait;

use super::client::{ChatMessage, CompletionRequest};
use super::{context_str, truncate_chars, AiController, AnalysisContext, ControllerCore};
use crate::{IntelligenceError, Result};

const SYSTEM_PROMPT: &str = "You assess whether email content describes real events or is \
fictional, fabricated or deceptive. Respond only with a JSON object with the keys \
fictionality_score (0.0 real to 1.0 fictional), confidence (0.0 to 1.0), \
indicators (array of short strings) and reasoning (one or two sentences).";

/// Default character budget for the email body
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 8000;

/// Scores one email for fabricated or deceptive content
#[derive(Debug, Clone)]
pub struct FictionalityAnalyzer {
    core: ControllerCore,
    max_content_chars: usize,
}

impl FictionalityAnalyzer {
    /// Analyzer with the default body budget
    pub fn new(core: ControllerCore) -> Self {
        Self {
            core,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }

    /// Cap on body characters sent to the provider
    pub fn with_max_content_chars(mut self, max_content_chars: usize) -> Self {
        self.max_content_chars = max_content_chars.max(1);
        self
    }
}

#[async_trait]
impl AiController for FictionalityAnalyzer {
    fn name(&self) -> &str {
        "fictionality_analyzer"
    }

    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn build_request(&self, context: &AnalysisContext) -> Result<CompletionRequest> {
        let content = context_str(context, "content").ok_or_else(|| {
            IntelligenceError::InvalidContext("fictionality context requires content".to_string())
        })?;
        let (content, truncated) = truncate_chars(content, self.max_content_chars);

        let mut prompt = String::new();
        if let Some(sender) = context_str(context, "sender") {
            let _ = writeln!(prompt, "<sender>{sender}</sender>");
        }
        if let Some(subject) = context_str(context, "subject") {
            let _ = writeln!(prompt, "<subject>{subject}</subject>");
        }
        let _ = writeln!(prompt, "<body>{content}</body>");
        if truncated {
            prompt.push_str("(body truncated)\n");
        }
        prompt.push_str("Assess the fictionality of this email.");

        Ok(CompletionRequest {
            model: self.core.model().to_string(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: self.core.temperature(),
            max_tokens: Some(400),
            json_response: true,
        })
    }
}
