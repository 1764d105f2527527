//! VLM interaction: send one page image, get the six loan fields back.
//!
//! This module is intentionally thin: the prompt lives in
//! [`crate::prompts`], and the orchestrator owns timeouts and the
//! skip-failed-page policy. What lives here is the request layout and the
//! lenient response parser.
//!
//! ## Output contract
//!
//! The model is asked for a single JSON object, but a merely malformed or
//! incomplete answer is never an error: unreadable values become absent
//! fields, malformed lists and maps become empty. Only the call itself
//! failing yields [`LoanScanError::ExtractionService`].

use super::encode::to_image_data;
use super::PageImage;
use crate::config::PipelineConfig;
use crate::error::LoanScanError;
use crate::fields::{ExtractedFields, LoanField};
use crate::prompts::EXTRACTION_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Extracts loan fields from one page image. Stateless between calls.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, page: &PageImage) -> Result<ExtractedFields, LoanScanError>;
}

/// [`FieldExtractor`] backed by an `edgequake-llm` vision provider.
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

impl VisionExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LoanScanError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl FieldExtractor for VisionExtractor {
    /// The request contains (in order):
    /// 1. **System message**: the six-field extraction prompt
    /// 2. **User message**: the page JPEG as a base64 attachment (empty text)
    async fn extract(&self, page: &PageImage) -> Result<ExtractedFields, LoanScanError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images("", vec![to_image_data(page)]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| LoanScanError::ExtractionService {
                message: format!("{}", e),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page.page_num,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(parse_extraction(&response.content))
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n?(.*?)\n?```\s*$").unwrap());

/// Strip a surrounding ```json fence and anything outside the outermost
/// `{ … }`. Models add both despite being told not to.
fn json_payload(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let inner = match RE_JSON_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    };
    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    (start < end).then(|| &inner[start..=end])
}

/// Parse a raw model answer into [`ExtractedFields`] without ever failing.
pub fn parse_extraction(raw: &str) -> ExtractedFields {
    let value = match json_payload(raw).map(serde_json::from_str::<Value>) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            warn!("Extraction response is not valid JSON: {}", e);
            return ExtractedFields::default();
        }
        None => {
            warn!("Extraction response contains no JSON object");
            return ExtractedFields::default();
        }
    };
    let Some(obj) = value.as_object() else {
        warn!("Extraction response is JSON but not an object");
        return ExtractedFields::default();
    };

    let mut fields = ExtractedFields::default();
    for field in LoanField::ALL {
        fields.set_value(field, obj.get(field.wire_name()).and_then(field_value));
    }
    fields.fields_found = field_list(obj.get("fieldsFound"));
    fields.fields_not_found = field_list(obj.get("fieldsNotFound"));
    fields.confidence = confidence_map(obj.get("confidence"));
    fields
}

/// A non-empty string (trimmed). Numbers are accepted and rendered as
/// written, since amounts and ID numbers are sometimes emitted unquoted.
fn field_value(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn field_list(v: Option<&Value>) -> Vec<LoanField> {
    let Some(Value::Array(items)) = v else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(items.len());
    for name in items.iter().filter_map(Value::as_str) {
        if let Some(field) = LoanField::from_wire_name(name.trim()) {
            if !out.contains(&field) {
                out.push(field);
            }
        }
    }
    out
}

fn confidence_map(v: Option<&Value>) -> BTreeMap<LoanField, u8> {
    let Some(Value::Object(map)) = v else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(name, score)| {
            let field = LoanField::from_wire_name(name.trim())?;
            let score = match score {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
                _ => return None,
            };
            if !score.is_finite() {
                return None;
            }
            Some((field, score.round().clamp(0.0, 100.0) as u8))
        })
        .collect()
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, LoanScanError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LoanScanError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, LoanScanError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LoanScanError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
