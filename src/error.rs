//! Error types for the handwrite-extract library.
//!
//! A pipeline either runs to completion or aborts with exactly one
//! [`HandwriteError`]. There is no partial result: a failure in any stage
//! discards everything accumulated so far.
//!
//! An *extraction miss* (the text model answered, but nothing in its output
//! parsed as a JSON object) is deliberately **not** an error. It degrades to
//! the sentinel result described in [`crate::output::Concepts::unrecognized`],
//! so callers can tell "the pipeline ran but the answer was ambiguous" apart
//! from "the pipeline could not run".

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which remote completion call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Multimodal transcription of the document images.
    Vision,
    /// Text-only structured-field extraction.
    Extraction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vision => f.write_str("vision"),
            Stage::Extraction => f.write_str("extraction"),
        }
    }
}

/// All fatal errors returned by the handwrite-extract library.
#[derive(Debug, Error)]
pub enum HandwriteError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A source image could not be read.
    #[error("Failed to read image '{path}': {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The boundary handed the core something it cannot run on.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── Service errors ────────────────────────────────────────────────────
    /// The model catalog of a service could not be reached or decoded.
    #[error("Cannot connect to {stage} service at '{endpoint}': {detail}")]
    Connectivity {
        stage: Stage,
        endpoint: String,
        detail: String,
    },

    /// The service is reachable but does not serve the requested model.
    ///
    /// `available` is sorted ascending and is the main debugging signal for
    /// operators, so it is always carried through to the error report.
    #[error("{stage} model not available: '{model}' (served: {})", served_list(available))]
    ModelUnavailable {
        stage: Stage,
        model: String,
        available: Vec<String>,
    },

    /// Transport or protocol failure during a streaming completion.
    #[error("{stage} model error: {detail}")]
    StageFailed { stage: Stage, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Catalog as shown in operator messages.
fn served_list(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}

impl HandwriteError {
    /// Model identifiers the service actually serves, when this is a mismatch.
    pub fn available_models(&self) -> Option<&[String]> {
        match self {
            HandwriteError::ModelUnavailable { available, .. } => Some(available),
            _ => None,
        }
    }

    /// Caller-facing error descriptor.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            error: self.to_string(),
            available_models: self.available_models().map(<[String]>::to_vec),
        }
    }
}

/// Serialisable form of a pipeline abort, handed back to the boundary layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_models: Option<Vec<String>>,
}

/// Failure raised by an [`crate::client::InferenceService`] implementation.
///
/// Services do not know which pipeline stage they serve; the orchestrator
/// maps these into [`HandwriteError::Connectivity`] or
/// [`HandwriteError::StageFailed`] depending on where they surface.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Request could not be sent or the connection dropped mid-response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected wire format.
    #[error("protocol error: {0}")]
    Protocol(String),
}
