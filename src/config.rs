//! Configuration types for the signature-verification pipelines.
//!
//! A pipeline run is described by a [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Transport-level knobs that apply to every pooled
//! connection live separately in [`PoolSettings`], because the pool outlives
//! any single request.

use crate::error::HandwriteError;
use std::fmt;

/// Default OpenAI-compatible endpoint (a local Ollama instance).
pub const DEFAULT_SERVER: &str = "http://localhost:11434/v1";

/// Default model for both stages.
pub const DEFAULT_MODEL: &str = "qwen3-vl:8b-instruct";

/// Placeholder credential for services that ignore the bearer token.
pub const DEFAULT_API_KEY: &str = "not-needed";

/// One remote inference service: where it lives, which model to ask for, and
/// the bearer token to present.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub server: String,
    pub model: String,
    pub api_key: String,
}

impl ServiceEndpoint {
    pub fn new(
        server: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

impl Default for ServiceEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER, DEFAULT_MODEL, DEFAULT_API_KEY)
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("server", &self.server)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for one pipeline invocation.
///
/// # Example
/// ```rust
/// use handwrite_extract::{PipelineConfig, ServiceEndpoint};
///
/// let config = PipelineConfig::builder()
///     .vision(ServiceEndpoint::new("http://gpu-1:11434/v1", "qwen3-vl:8b-instruct", "not-needed"))
///     .extraction(ServiceEndpoint::new("http://gpu-2:8000/v1", "qwen2.5:14b", "sk-local"))
///     .max_tokens(4096)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Service running the multimodal transcription stage.
    pub vision: ServiceEndpoint,

    /// Service running the structured-extraction stage. Unused by the
    /// classification pipeline.
    pub extraction: ServiceEndpoint,

    /// Instruction sent with the images. If None, the pipeline's built-in
    /// prompt from [`crate::prompts`] is used.
    pub prompt: Option<String>,

    /// Output-token ceiling for the extraction stage. Default: 16384.
    pub max_tokens: u32,

    /// Reserved paragraph limit. Accepted and carried but not consumed.
    pub max_paras: u32,

    /// Reserved item limit. Accepted and carried but not consumed.
    pub max_items: u32,

    /// Sampling temperature for both stages. Default: 0.0.
    ///
    /// Transcription must be faithful to the images; any creativity shows up
    /// as invented names.
    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vision: ServiceEndpoint::default(),
            extraction: ServiceEndpoint::default(),
            prompt: None,
            max_tokens: 16384,
            max_paras: 2000,
            max_items: 5,
            temperature: 0.0,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn vision(mut self, service: ServiceEndpoint) -> Self {
        self.config.vision = service;
        self
    }

    pub fn extraction(mut self, service: ServiceEndpoint) -> Self {
        self.config.extraction = service;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_paras(mut self, n: u32) -> Self {
        self.config.max_paras = n;
        self
    }

    pub fn max_items(mut self, n: u32) -> Self {
        self.config.max_items = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, HandwriteError> {
        let c = &self.config;
        for (label, service) in [("vision", &c.vision), ("extraction", &c.extraction)] {
            if service.server.trim().is_empty() {
                return Err(HandwriteError::InvalidConfig(format!(
                    "{label} server URL must not be empty"
                )));
            }
            if service.model.trim().is_empty() {
                return Err(HandwriteError::InvalidConfig(format!(
                    "{label} model must not be empty"
                )));
            }
        }
        if c.max_tokens == 0 {
            return Err(HandwriteError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Transport settings applied to every connection the pool creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Overall ceiling for one HTTP call, streaming included. Default: 300.
    ///
    /// Vision models on modest GPUs can take minutes to transcribe two
    /// high-resolution images.
    pub timeout_secs: u64,

    /// Ceiling for establishing the TCP/TLS connection. Default: 60.
    pub connect_timeout_secs: u64,

    /// Idle keep-alive connections retained per host. Default: 10.
    pub max_idle_per_host: usize,

    /// Concurrent in-flight requests allowed per pooled client. Default: 50.
    pub max_connections: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            connect_timeout_secs: 60,
            max_idle_per_host: 10,
            max_connections: 50,
        }
    }
}
