use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw page read reported by a `PageProbe`. The text fields are candidates in
/// falling preference order; whichever is present and substantial enough wins
/// (see `observer::signature`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub url: String,
    pub title: String,
    pub meta_description: String,
    pub meta_keywords: String,
    /// Readability-style extraction of the main article, when available.
    pub readable_text: Option<String>,
    /// innerText of the page's `<main>` element.
    pub main_text: Option<String>,
    /// innerText of the page's `<article>` element.
    pub article_text: Option<String>,
    /// innerText of `<body>`, the last-resort fallback.
    pub body_text: Option<String>,
}

/// The settled extraction of one page, handed to the coordinator for
/// classification. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub meta_description: String,
    pub meta_keywords: String,
    /// Bounded-length body excerpt for the classifier.
    pub body_text_snippet: String,
    pub extracted_at: DateTime<Utc>,
}
