//! Pipeline stages for signature verification.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own against a stubbed [`crate::client::InferenceService`].
//!
//! ## Data Flow
//!
//! ```text
//! encode ──▶ catalog ──▶ llm (vision) ──▶ catalog ──▶ llm (extraction) ──▶ extract
//! (base64)   (models?)   (stream)         (models?)   (stream)              (JSON)
//! ```
//!
//! 1. [`encode`]: read image files and wrap them as `data:` URLs
//! 2. [`catalog`]: confirm the requested model is served before spending a
//!    multi-minute completion on it
//! 3. [`llm`]: run one streaming completion and assemble its text
//! 4. [`extract`]: recover a JSON object from free-form model output

pub mod catalog;
pub mod encode;
pub mod extract;
pub mod llm;
