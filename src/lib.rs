//! # handwrite-extract
//!
//! Verify a handwritten signature against an identity card with two chained
//! LLM services, and classify document images with one.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images
//!  │
//!  ├─ 1. Encode   file bytes → base64 data URLs (tokio::fs, extension → MIME)
//!  ├─ 2. Check    vision model listed in GET /models?
//!  ├─ 3. Vision   streaming multimodal completion → transcription
//!  ├─ 4. Check    text model listed in GET /models?
//!  ├─ 5. Extract  streaming text completion → "only JSON" answer
//!  └─ 6. Recover  4-strategy JSON recovery → {姓名, 签名一致} or sentinel
//! ```
//!
//! Classification stops after step 3 and returns the transcription verbatim.
//!
//! Remote services are reached through a [`ClientPool`] that keeps one
//! client per (server, api key) for the life of the process. Create it once,
//! share it, and call [`ClientPool::release_all`] at shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handwrite_extract::{ClientPool, Pipeline, PipelineConfig, PoolSettings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(ClientPool::http(PoolSettings::default()));
//!     let pipeline = Pipeline::new(Arc::clone(&pool));
//!
//!     let config = PipelineConfig::default();
//!     match pipeline.verify(&["id_card.jpg", "signature.png"], &config).await {
//!         Ok(out) => println!("{}", serde_json::to_string_pretty(&out)?),
//!         Err(e) => eprintln!("{}", serde_json::to_string(&e.report())?),
//!     }
//!
//!     pool.release_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `handwrite` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{HttpConnector, HttpService, Increment, IncrementStream, InferenceService, StageRequest};
pub use config::{PipelineConfig, PipelineConfigBuilder, PoolSettings, ServiceEndpoint};
pub use error::{ErrorReport, HandwriteError, ServiceError, Stage};
pub use output::{
    ClassificationOutput, ClassifyEnvelope, Concepts, ExtractionResult, MatchValue,
    VerificationOutput,
};
pub use pipeline::extract::extract_concepts;
pub use pool::{ClientPool, ConnectionKey, Connector};
pub use run::{list_models, Pipeline, Upload};
