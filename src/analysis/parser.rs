//! Normalises raw provider responses into analysis results

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::client::CompletionResponse;
use super::{AnalysisContext, AnalysisResult};
use crate::{IntelligenceError, Result};

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fenced block pattern is valid")
});

/// Turns one provider response into a normalised [`AnalysisResult`]
pub trait ResponseParser: Send + Sync {
    /// Parse `response` produced for `context` under `analysis_id`
    fn parse(
        &self,
        response: &CompletionResponse,
        context: &AnalysisContext,
        analysis_id: &str,
    ) -> Result<AnalysisResult>;
}

/// Default parser: expects the model to answer with a JSON object.
///
/// Code fences are stripped, and when the content is not a bare object the
/// first `{` that starts a complete JSON object wins; trailing prose is
/// ignored. Content with no JSON object at all is kept
/// under `raw_response`.
#[derive(Debug, Clone)]
pub struct JsonResponseParser {
    /// Context keys echoed into the result
    echo_keys: Vec<String>,
}

impl JsonResponseParser {
    /// Parser that echoes no context keys
    pub fn new() -> Self {
        Self {
            echo_keys: Vec::new(),
        }
    }

    /// Copy these context keys into every parsed result
    pub fn with_echo_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.echo_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    fn extract_object(content: &str) -> Option<Map<String, Value>> {
        let trimmed = content.trim();
        let unfenced = FENCED_BLOCK
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map_or(trimmed, |m| m.as_str());

        if let Ok(Value::Object(map)) = serde_json::from_str(unfenced) {
            return Some(map);
        }

        debug!("Response is not a bare JSON object, scanning for an embedded one");
        unfenced.match_indices('{').find_map(|(start, _)| {
            match serde_json::Deserializer::from_str(&unfenced[start..])
                .into_iter::<Value>()
                .next()
            {
                Some(Ok(Value::Object(map))) => Some(map),
                _ => None,
            }
        })
    }
}

impl Default for JsonResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser for JsonResponseParser {
    fn parse(
        &self,
        response: &CompletionResponse,
        context: &AnalysisContext,
        analysis_id: &str,
    ) -> Result<AnalysisResult> {
        let content = response
            .first_content()
            .ok_or_else(|| IntelligenceError::Parse("response contained no choices".to_string()))?;

        let mut result = match Self::extract_object(content) {
            Some(map) => map,
            None => {
                let mut map = Map::new();
                map.insert("raw_response".to_string(), json!(content));
                map
            }
        };

        for key in &self.echo_keys {
            if let Some(value) = context.get(key) {
                result.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        result.insert("analysis_id".to_string(), json!(analysis_id));
        result.insert("model".to_string(), json!(response.model));
        result.insert("analyzed_at".to_string(), json!(Utc::now().to_rfc3339()));
        if let Some(usage) = response.usage {
            result.insert("usage".to_string(), serde_json::to_value(usage)?);
        }

        Ok(result)
    }
}
