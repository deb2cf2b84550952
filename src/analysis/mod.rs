//! AI controllers for EmailIntelligence
//!
//! Each analyzer exposes a single-item [`AiController::analyze`] entry point:
//! build a provider request from the context, issue one completion call, and
//! hand the raw response to a [`ResponseParser`]. [`batch_analyze`] fans that
//! entry point out over many contexts through a [`BatchExecutor`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::batch::{BatchExecutor, BatchOutcome};
use crate::Result;

pub mod client;
pub mod conflict;
pub mod fictionality;
pub mod parser;

pub use client::*;
pub use conflict::ConflictAnalyzer;
pub use fictionality::FictionalityAnalyzer;
pub use parser::{JsonResponseParser, ResponseParser};

/// Input for one analysis call
pub type AnalysisContext = Map<String, Value>;

/// Normalised output of one analysis call
pub type AnalysisResult = Map<String, Value>;

/// Collaborators shared by every controller, injected at construction
#[derive(Clone)]
pub struct ControllerCore {
    client: Arc<dyn CompletionClient>,
    parser: Arc<dyn ResponseParser>,
    model: String,
    temperature: f32,
}

impl std::fmt::Debug for ControllerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCore")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ControllerCore {
    /// Use the client's default model and the default JSON parser
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            client,
            parser: Arc::new(JsonResponseParser::new()),
            model,
            temperature: 0.1,
        }
    }

    /// Override the response parser
    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Override the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Injected completion client
    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    /// Parser applied to every response
    pub fn parser(&self) -> &Arc<dyn ResponseParser> {
        &self.parser
    }

    /// Model sent with each request
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sampling temperature sent with each request
    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Uniform single-item entry point implemented by every analyzer
#[async_trait]
pub trait AiController: Send + Sync {
    /// Analyzer name, stamped into every result under `analyzer`
    fn name(&self) -> &str;

    /// Injected client, parser and model settings
    fn core(&self) -> &ControllerCore;

    /// Build the provider request for one context
    fn build_request(&self, context: &AnalysisContext) -> Result<CompletionRequest>;

    /// Analyze one context: one request, one client call, one parse
    async fn analyze(&self, context: &AnalysisContext) -> Result<AnalysisResult> {
        let request = self.build_request(context)?;
        let analysis_id = Uuid::new_v4().to_string();
        debug!(analyzer = self.name(), analysis_id = %analysis_id, "Dispatching analysis");

        let core = self.core();
        let response = core.client().complete(request).await?;
        let mut result = core.parser().parse(&response, context, &analysis_id)?;
        result.insert("analyzer".to_string(), Value::String(self.name().to_string()));
        Ok(result)
    }
}

/// Run `controller.analyze` over every context through `executor`.
///
/// Analyzer errors land in `failed`/`errors`; results whose object carries an
/// `error` key land in `rejected`.
#[instrument(skip(controller, executor, contexts), fields(analyzer = controller.name(), count = contexts.len()))]
pub async fn batch_analyze<C>(
    controller: Arc<C>,
    executor: &BatchExecutor,
    contexts: Vec<AnalysisContext>,
) -> BatchOutcome
where
    C: AiController + ?Sized + 'static,
{
    executor
        .run_batch(contexts, move |context: AnalysisContext| {
            let controller = Arc::clone(&controller);
            async move { controller.analyze(&context).await.map(Value::Object) }
        })
        .await
}

/// Shared prompt helpers
pub(crate) fn context_str<'a>(context: &'a AnalysisContext, key: &str) -> Option<&'a str> {
    context
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Cut `text` to at most `max_chars` characters on a char boundary
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
