//! Configuration types for the extraction pipeline and HTTP service.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. The HTTP layer has its own small
//! [`ServerConfig`]. The timezone used for `uploadDate` filters belongs to
//! the store; see [`parse_utc_offset`] and
//! [`MemoryDocumentStore::with_reference_tz`](crate::store::MemoryDocumentStore::with_reference_tz).

use crate::error::LoanScanError;
use chrono::FixedOffset;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for document normalisation, extraction and scheduling.
///
/// # Example
/// ```rust
/// use loanscan::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .max_concurrent_documents(2)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    ///
    /// Loan forms are dense with small print (account numbers, ID numbers),
    /// so the default is higher than for general documents.
    pub dpi: u32,

    /// Maximum rendered width in pixels. Default: 2000.
    pub max_width: u32,

    /// Maximum rendered height in pixels. Default: 2800.
    ///
    /// Together with `max_width` this caps memory regardless of physical
    /// page size; the other dimension is scaled proportionally.
    pub max_height: u32,

    /// JPEG quality (1–100) for every page image sent to the VLM. Default: 90.
    pub jpeg_quality: u8,

    /// Path to a pdfium shared library (file or directory). If None, binds
    /// to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Maximum number of documents processed at once. Default: 4.
    ///
    /// Documents beyond this stay `queued` until a slot frees up, which
    /// bounds concurrent VLM traffic.
    pub max_concurrent_documents: usize,

    /// Concurrent extraction calls within one document. Default: 4.
    ///
    /// Results are always merged in page order regardless of completion order.
    pub page_concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini", "claude-sonnet-4-20250514".
    /// If None, uses the default model.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the LLM completion. Default: 0.0.
    ///
    /// Field extraction is transcription; any creativity is a defect.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 1024.
    ///
    /// The response is a single small JSON object.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// Per-page extraction timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_width: 2000,
            max_height: 2800,
            jpeg_quality: 90,
            pdfium_lib_path: None,
            max_concurrent_documents: 4,
            page_concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
            system_prompt: None,
            api_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_width", &self.max_width)
            .field("max_height", &self.max_height)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("max_concurrent_documents", &self.max_concurrent_documents)
            .field("page_concurrency", &self.page_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Scale factor pdfium applies to a page's size in points (1/72 inch).
    pub fn render_scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_width(mut self, px: u32) -> Self {
        self.config.max_width = px.max(100);
        self
    }

    pub fn max_height(mut self, px: u32) -> Self {
        self.config.max_height = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn max_concurrent_documents(mut self, n: usize) -> Self {
        self.config.max_concurrent_documents = n;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, LoanScanError> {
        let c = &self.config;
        if c.max_concurrent_documents == 0 {
            return Err(LoanScanError::InvalidConfig(
                "max_concurrent_documents must be ≥ 1".into(),
            ));
        }
        if c.page_concurrency == 0 {
            return Err(LoanScanError::InvalidConfig(
                "page_concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(LoanScanError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(LoanScanError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

/// Configuration for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory uploaded files are written to. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Largest accepted upload in bytes. Default: 20 MiB.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Parse a `+HH:MM` / `-HH:MM` / `Z` offset.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset, LoanScanError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(chrono::Offset::fix(&chrono::Utc));
    }
    s.parse::<FixedOffset>()
        .map_err(|e| LoanScanError::InvalidConfig(format!("invalid UTC offset '{s}': {e}")))
}
