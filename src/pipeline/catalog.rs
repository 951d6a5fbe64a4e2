//! Model availability check.
//!
//! A misspelt model tag is the most common operator mistake, and most
//! OpenAI-compatible servers answer it with a slow or opaque failure deep
//! into a streaming call. Listing the catalog first turns it into an
//! immediate [`HandwriteError::ModelUnavailable`] that names every model the
//! server does serve.

use crate::client::InferenceService;
use crate::error::{HandwriteError, Stage};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Confirm `model` is in the catalog of `service`.
///
/// `endpoint` is only used to label a connectivity error.
pub async fn verify_model<S>(
    service: &S,
    stage: Stage,
    endpoint: &str,
    model: &str,
) -> Result<(), HandwriteError>
where
    S: InferenceService + ?Sized,
{
    info!("Checking {} model: server={}, model={}", stage, endpoint, model);

    let served: BTreeSet<String> = service
        .list_models()
        .await
        .map_err(|e| HandwriteError::Connectivity {
            stage,
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?
        .into_iter()
        .collect();

    if served.contains(model) {
        return Ok(());
    }

    warn!(
        "{} model '{}' not served by {} ({} available)",
        stage,
        model,
        endpoint,
        served.len()
    );
    Err(HandwriteError::ModelUnavailable {
        stage,
        model: model.to_string(),
        available: served.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{IncrementStream, StageRequest};
    use crate::error::ServiceError;
    use async_trait::async_trait;

    struct Catalog(Result<Vec<String>, ServiceError>);

    #[async_trait]
    impl InferenceService for Catalog {
        async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
            self.0.clone()
        }

        async fn stream_chat(&self, _: &StageRequest) -> Result<IncrementStream, ServiceError> {
            Err(ServiceError::Transport("unused".into()))
        }
    }

    fn catalog(ids: &[&str]) -> Catalog {
        Catalog(Ok(ids.iter().map(|s| s.to_string()).collect()))
    }

    #[tokio::test]
    async fn served_model_passes() {
        let svc = catalog(&["qwen3-vl:8b-instruct", "llava:7b"]);
        for model in ["qwen3-vl:8b-instruct", "llava:7b"] {
            verify_model(&svc, Stage::Vision, "http://h/v1", model)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn missing_model_returns_sorted_catalog() {
        let svc = catalog(&["zeta", "alpha", "mid", "alpha"]);
        let err = verify_model(&svc, Stage::Extraction, "http://h/v1", "qwen")
            .await
            .unwrap_err();
        match err {
            HandwriteError::ModelUnavailable {
                stage,
                model,
                available,
            } => {
                assert_eq!(stage, Stage::Extraction);
                assert_eq!(model, "qwen");
                assert_eq!(available, vec!["alpha", "mid", "zeta"]);
            }
            other => panic!("expected ModelUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_catalog_is_a_mismatch() {
        let svc = catalog(&[]);
        let err = verify_model(&svc, Stage::Vision, "http://h/v1", "m")
            .await
            .unwrap_err();
        assert_eq!(err.available_models(), Some(&[][..]));
    }

    #[tokio::test]
    async fn unreachable_catalog_is_connectivity_error() {
        let svc = Catalog(Err(ServiceError::Transport("connection refused".into())));
        let err = verify_model(&svc, Stage::Vision, "http://h/v1", "m")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, HandwriteError::Connectivity { endpoint, .. } if endpoint == "http://h/v1"),
            "got: {err:?}"
        );
        assert!(err.available_models().is_none());
    }
}
