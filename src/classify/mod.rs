mod http;

pub use http::HttpClassifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload sent to the classification backend. Field names are the wire
/// contract and must stay snake_case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifyRequest {
    pub url: String,
    pub title: String,
    pub meta_description: String,
    pub meta_keywords: String,
    pub page_text_snippet: String,
    pub session_focus: String,
}

/// The backend's two-way verdict. Everything else the pipeline derives
/// (Error, LimitReached) comes from the error channel, not from here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    Relevant,
    Irrelevant,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Request never completed (connect/timeout/transport).
    #[error("classification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered, but not with a usable verdict.
    #[error("classification backend error: {0}")]
    Backend(String),

    /// Quota exhausted; maps to the LimitReached terminal state and is not
    /// retried until externally cleared.
    #[error("classification usage limit reached")]
    UsageLimit,
}

/// The remote classification collaborator, behind a trait so the coordinator
/// can be exercised without a network.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Verdict, ClassifyError>;
}
