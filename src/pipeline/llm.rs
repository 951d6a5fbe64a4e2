//! Streaming completion runner.
//!
//! Runs one chat completion with incremental delivery and assembles the
//! full text. The contract is all-or-nothing: if the stream fails part-way,
//! whatever text arrived is dropped and the stage fails. A half-transcribed
//! ID card is worse than none, since the extraction stage would happily
//! pull a truncated name out of it.

use crate::client::{InferenceService, StageRequest};
use crate::error::{HandwriteError, Stage};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Text assembled from one successful stage, with its wall-clock duration.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub text: String,
    pub duration: Duration,
}

impl StageOutcome {
    /// Duration in seconds rounded to milliseconds, as reported to callers.
    pub fn duration_secs(&self) -> f64 {
        (self.duration.as_secs_f64() * 1000.0).round() / 1000.0
    }
}

/// Issue `request` on `service` and concatenate every text increment.
///
/// Increments are consumed strictly in arrival order; increments without a
/// text delta contribute nothing. The timer covers request issuance through
/// the end of the stream.
pub async fn run_stage<S>(
    service: &S,
    stage: Stage,
    request: &StageRequest,
) -> Result<StageOutcome, HandwriteError>
where
    S: InferenceService + ?Sized,
{
    let start = Instant::now();
    let failed = |e: crate::error::ServiceError| HandwriteError::StageFailed {
        stage,
        detail: e.to_string(),
    };

    let mut stream = service.stream_chat(request).await.map_err(failed)?;

    let mut text = String::new();
    let mut increments = 0usize;
    while let Some(item) = stream.next().await {
        let increment = item.map_err(failed)?;
        increments += 1;
        if let Some(delta) = increment.text {
            text.push_str(&delta);
        }
    }

    let duration = start.elapsed();
    debug!(
        "{} stage: {} increments, {} chars in {:?}",
        stage,
        increments,
        text.chars().count(),
        duration
    );
    Ok(StageOutcome { text, duration })
}

/// Log the first `limit` characters of a transcription.
pub fn log_preview(stage: Stage, text: &str, limit: usize) {
    let mut preview: String = text.chars().take(limit).collect();
    if text.chars().count() > limit {
        preview.push_str("...");
    }
    info!("{} text preview: {}", stage, preview);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Increment, IncrementStream};
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use futures::stream;

    struct Scripted(Vec<Result<Increment, ServiceError>>);

    #[async_trait]
    impl InferenceService for Scripted {
        async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
            Ok(vec![])
        }

        async fn stream_chat(&self, _: &StageRequest) -> Result<IncrementStream, ServiceError> {
            Ok(Box::pin(stream::iter(self.0.clone())))
        }
    }

    struct Refusing;

    #[async_trait]
    impl InferenceService for Refusing {
        async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
            Ok(vec![])
        }

        async fn stream_chat(&self, _: &StageRequest) -> Result<IncrementStream, ServiceError> {
            Err(ServiceError::Status {
                status: 503,
                body: "overloaded".into(),
            })
        }
    }

    fn request() -> StageRequest {
        StageRequest::text("m", "hello")
    }

    #[tokio::test]
    async fn concatenates_text_increments_in_order() {
        let svc = Scripted(vec![
            Ok(Increment::empty()),
            Ok(Increment::text("姓名：")),
            Ok(Increment::text("")),
            Ok(Increment::empty()),
            Ok(Increment::text("张三")),
        ]);
        let out = run_stage(&svc, Stage::Vision, &request()).await.unwrap();
        assert_eq!(out.text, "姓名：张三");
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_text() {
        let svc = Scripted(vec![]);
        let out = run_stage(&svc, Stage::Extraction, &request()).await.unwrap();
        assert!(out.text.is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_discards_partial_text() {
        let svc = Scripted(vec![
            Ok(Increment::text("partial ")),
            Err(ServiceError::Transport("connection reset".into())),
            Ok(Increment::text("never seen")),
        ]);
        let err = run_stage(&svc, Stage::Vision, &request()).await.unwrap_err();
        match err {
            HandwriteError::StageFailed { stage, detail } => {
                assert_eq!(stage, Stage::Vision);
                assert!(detail.contains("connection reset"));
                assert!(!detail.contains("partial"));
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_request_is_stage_failure() {
        let err = run_stage(&Refusing, Stage::Extraction, &request())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, HandwriteError::StageFailed { stage: Stage::Extraction, detail } if detail.contains("503")),
            "got: {err:?}"
        );
    }

    #[test]
    fn duration_rounds_to_millis() {
        let out = StageOutcome {
            text: String::new(),
            duration: Duration::from_micros(1_234_567),
        };
        assert_eq!(out.duration_secs(), 1.235);
    }
}
