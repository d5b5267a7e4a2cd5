use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{ClassifyError, ClassifyRequest, Classifier, Verdict};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ERROR_BODY_PREVIEW_LEN: usize = 200;

/// Classification over the HTTP backend: POST JSON, expect
/// `{"assessment": "Relevant" | "Irrelevant"}`. A 429 signals quota
/// exhaustion; any other non-2xx is a hard backend error.
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct AssessmentResponse {
    assessment: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClassifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn parse_verdict(raw: &str) -> Result<Verdict, ClassifyError> {
        match raw {
            "Relevant" => Ok(Verdict::Relevant),
            "Irrelevant" => Ok(Verdict::Irrelevant),
            other => Err(ClassifyError::Backend(format!(
                "unexpected assessment value '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<Verdict, ClassifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifyError::UsageLimit);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW_LEN).collect();
            warn!(
                "classification backend returned {} for {}: {}",
                status, request.url, preview
            );
            return Err(ClassifyError::Backend(format!("{status}: {preview}")));
        }

        let parsed: AssessmentResponse = response
            .json()
            .await
            .map_err(|err| ClassifyError::Backend(format!("invalid response body: {err}")))?;

        Self::parse_verdict(&parsed.assessment)
    }
}
