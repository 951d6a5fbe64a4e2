//! Pipeline orchestration: the two public workflows.
//!
//! * [`Pipeline::verify`]: two stages. A vision model transcribes the ID
//!   card and the signature; a text model turns that transcription into
//!   `{姓名, 签名一致, 理由}` JSON, which is then recovered by
//!   [`crate::pipeline::extract`].
//! * [`Pipeline::classify`]: one stage. The vision model's answer is
//!   returned verbatim.
//!
//! Both short-circuit on the first hard failure and never return partial
//! results. The catalog check for a stage runs right before that stage, so a
//! bad vision model tag fails before anything is sent to the text service.

use crate::client::{HttpConnector, InferenceService, StageRequest};
use crate::config::{PipelineConfig, ServiceEndpoint};
use crate::error::{HandwriteError, Stage};
use crate::output::{ClassificationOutput, VerificationOutput};
use crate::pipeline::{catalog, encode, extract, llm};
use crate::pool::{ClientPool, Connector};
use crate::prompts;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Characters of vision output shown in the info-level preview.
const PREVIEW_CHARS: usize = 400;

/// An uploaded image held in memory.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-side file name; only its extension is used.
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: Some(filename.into()),
            bytes,
        }
    }

    /// Extension for the temp file, `.png` when the name has none.
    fn suffix(&self) -> String {
        self.filename
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".png".to_string())
    }
}

/// The orchestrator. Cheap to clone; clones share the pool.
pub struct Pipeline<C: Connector = HttpConnector> {
    pool: Arc<ClientPool<C>>,
}

impl<C: Connector> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<C: Connector> Pipeline<C> {
    pub fn new(pool: Arc<ClientPool<C>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ClientPool<C>> {
        &self.pool
    }

    /// Run the two-stage signature verification pipeline.
    ///
    /// # Errors
    /// Any unreadable image, unreachable catalog, unserved model or failed
    /// stream aborts the run. An unparseable extraction answer does **not**;
    /// it yields [`crate::output::Concepts::unrecognized`].
    pub async fn verify<P: AsRef<Path>>(
        &self,
        images: &[P],
        config: &PipelineConfig,
    ) -> Result<VerificationOutput, HandwriteError> {
        let prompt = config
            .prompt
            .as_deref()
            .unwrap_or(prompts::DEFAULT_VERIFY_PROMPT);
        let vision = self.run_vision(images, prompt, config).await?;
        let vision_secs = vision.duration_secs();

        let instruction = prompts::extraction_instruction(&vision.text);
        let service = self.checked_service(Stage::Extraction, &config.extraction).await?;
        info!(
            "Extraction started: model={}, max_tokens={}, instruct_len={}",
            config.extraction.model,
            config.max_tokens,
            instruction.chars().count()
        );
        let request = StageRequest::text(&config.extraction.model, instruction)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);
        let answer = llm::run_stage(service.as_ref(), Stage::Extraction, &request).await?;
        info!(
            "Extraction finished: output_len={}",
            answer.text.chars().count()
        );
        debug!("Extraction raw output: {}", answer.text);

        let extraction = extract::extract_concepts(&answer.text);
        Ok(VerificationOutput::new(vision.text, vision_secs, extraction))
    }

    /// Run the single-stage classification pipeline.
    pub async fn classify<P: AsRef<Path>>(
        &self,
        images: &[P],
        config: &PipelineConfig,
    ) -> Result<ClassificationOutput, HandwriteError> {
        let prompt = config
            .prompt
            .as_deref()
            .unwrap_or(prompts::DEFAULT_CLASSIFY_PROMPT);
        let vision = self.run_vision(images, prompt, config).await?;
        let duration = vision.duration_secs();
        Ok(ClassificationOutput {
            label: vision.text,
            duration,
        })
    }

    /// [`Pipeline::verify`] on in-memory uploads.
    ///
    /// Each upload is written to its own uniquely named temp file, which is
    /// removed on every exit path once the pipeline returns.
    pub async fn verify_from_bytes(
        &self,
        uploads: &[Upload],
        config: &PipelineConfig,
    ) -> Result<VerificationOutput, HandwriteError> {
        let files = spill_uploads(uploads)?;
        let paths: Vec<&Path> = files.iter().map(NamedTempFile::path).collect();
        self.verify(&paths, config).await
        // `files` dropped here, deleting the temp files
    }

    /// [`Pipeline::classify`] on in-memory uploads.
    pub async fn classify_from_bytes(
        &self,
        uploads: &[Upload],
        config: &PipelineConfig,
    ) -> Result<ClassificationOutput, HandwriteError> {
        let files = spill_uploads(uploads)?;
        let paths: Vec<&Path> = files.iter().map(NamedTempFile::path).collect();
        self.classify(&paths, config).await
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Encode images, check the vision model, and run the vision stage.
    async fn run_vision<P: AsRef<Path>>(
        &self,
        images: &[P],
        prompt: &str,
        config: &PipelineConfig,
    ) -> Result<llm::StageOutcome, HandwriteError> {
        if images.is_empty() {
            return Err(HandwriteError::InvalidInput("no images provided".into()));
        }
        debug!(
            "Reserved limits: max_paras={}, max_items={}",
            config.max_paras, config.max_items
        );

        let assets = encode::encode_all(images).await?;
        info!("Read {} image(s)", assets.len());

        let service = self.checked_service(Stage::Vision, &config.vision).await?;

        let request = StageRequest::multimodal(
            &config.vision.model,
            prompt,
            assets.into_iter().map(|a| a.data_url),
        )
        .with_temperature(config.temperature);
        info!(
            "Vision started: images={}, prompt_len={}",
            request.image_count(),
            prompt.chars().count()
        );

        let outcome = llm::run_stage(service.as_ref(), Stage::Vision, &request).await?;
        info!(
            "Vision finished: duration={:.3}s, text_len={}",
            outcome.duration_secs(),
            outcome.text.chars().count()
        );
        llm::log_preview(Stage::Vision, &outcome.text, PREVIEW_CHARS);
        Ok(outcome)
    }

    /// Acquire the pooled client for `endpoint` and confirm its model is served.
    async fn checked_service(
        &self,
        stage: Stage,
        endpoint: &ServiceEndpoint,
    ) -> Result<Arc<C::Service>, HandwriteError> {
        let service = self.pool.acquire(&endpoint.server, &endpoint.api_key).await?;
        catalog::verify_model(service.as_ref(), stage, &endpoint.server, &endpoint.model).await?;
        Ok(service)
    }
}

impl Pipeline<HttpConnector> {
    /// Pipeline over a fresh HTTP pool with default settings.
    pub fn http() -> Self {
        Self::new(Arc::new(ClientPool::default()))
    }
}

/// List the models served at `endpoint`, sorted.
pub async fn list_models<C: Connector>(
    pool: &ClientPool<C>,
    server: &str,
    api_key: &str,
) -> Result<Vec<String>, HandwriteError> {
    let service = pool.acquire(server, api_key).await?;
    let mut models = service
        .list_models()
        .await
        .map_err(|e| HandwriteError::Connectivity {
            stage: Stage::Vision,
            endpoint: server.to_string(),
            detail: e.to_string(),
        })?;
    models.sort();
    models.dedup();
    Ok(models)
}

fn spill_uploads(uploads: &[Upload]) -> Result<Vec<NamedTempFile>, HandwriteError> {
    uploads
        .iter()
        .map(|up| {
            let mut tmp = tempfile::Builder::new()
                .prefix("_tmp_")
                .suffix(&up.suffix())
                .tempfile()
                .map_err(|e| HandwriteError::Internal(format!("tempfile: {e}")))?;
            tmp.write_all(&up.bytes)
                .map_err(|e| HandwriteError::Internal(format!("tempfile write: {e}")))?;
            Ok(tmp)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_suffix_keeps_extension() {
        assert_eq!(Upload::new("id.JPG", vec![]).suffix(), ".JPG");
        assert_eq!(Upload::new("sig", vec![]).suffix(), ".png");
        let anon = Upload {
            filename: None,
            bytes: vec![],
        };
        assert_eq!(anon.suffix(), ".png");
    }

    #[test]
    fn spilled_uploads_are_removed_on_drop() {
        let files = spill_uploads(&[Upload::new("a.webp", b"abc".to_vec())]).unwrap();
        let path = files[0].path().to_path_buf();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".webp"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        drop(files);
        assert!(!path.exists());
    }
}
