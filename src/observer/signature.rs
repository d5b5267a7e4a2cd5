use chrono::{DateTime, Utc};

use crate::models::{PageSnapshot, PageView};

// Content-source selection thresholds. Short readability output usually means
// the extractor latched onto boilerplate, so it falls through to raw elements.
const SIGNATURE_READABLE_MIN_CHARS: usize = 50;
const SIGNATURE_READABLE_PREFIX_CHARS: usize = 1000;
const SIGNATURE_MAIN_PREFIX_CHARS: usize = 500;
const SIGNATURE_BODY_PREFIX_CHARS: usize = 300;

const SNIPPET_MIN_CHARS: usize = 100;
pub const SNIPPET_MAX_CHARS: usize = 2000;

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn trimmed_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// 32-bit rolling hash over UTF-16 code units. Collisions only cost a missed
/// change detection, never correctness, so speed wins over strength.
pub fn rolling_hash(text: &str) -> String {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    format!("{:x}", hash as u32)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Picks the signature content source: readability output when it produced
/// something substantial, otherwise main > article > body, each bounded.
fn signature_content(view: &PageView) -> String {
    if let Some(readable) = &view.readable_text {
        if trimmed_len(readable) > SIGNATURE_READABLE_MIN_CHARS {
            return truncate_chars(readable, SIGNATURE_READABLE_PREFIX_CHARS);
        }
    }
    if let Some(main) = &view.main_text {
        return truncate_chars(main, SIGNATURE_MAIN_PREFIX_CHARS);
    }
    if let Some(article) = &view.article_text {
        return truncate_chars(article, SIGNATURE_MAIN_PREFIX_CHARS);
    }
    truncate_chars(
        view.body_text.as_deref().unwrap_or(""),
        SIGNATURE_BODY_PREFIX_CHARS,
    )
}

/// Change-detection fingerprint: title, description, URL, and a hash of the
/// normalized content prefix. Whitespace-only churn intentionally vanishes.
pub fn page_signature(view: &PageView) -> String {
    let normalized = normalize_whitespace(signature_content(view).trim());
    format!(
        "{}::{}::{}::{}",
        view.title,
        view.meta_description,
        view.url,
        rolling_hash(&normalized)
    )
}

/// Body text for the final snapshot. Prefers readability output, then main and
/// article when they carry real content, then whatever the body has.
fn body_snippet(view: &PageView) -> String {
    if let Some(readable) = &view.readable_text {
        if trimmed_len(readable) > SNIPPET_MIN_CHARS {
            return truncate_chars(readable.trim(), SNIPPET_MAX_CHARS);
        }
    }
    if let Some(main) = &view.main_text {
        if trimmed_len(main) > SNIPPET_MIN_CHARS {
            return truncate_chars(main.trim(), SNIPPET_MAX_CHARS);
        }
    }
    if let Some(article) = &view.article_text {
        if trimmed_len(article) > SNIPPET_MIN_CHARS {
            return truncate_chars(article.trim(), SNIPPET_MAX_CHARS);
        }
    }
    truncate_chars(view.body_text.as_deref().unwrap_or("").trim(), SNIPPET_MAX_CHARS)
}

pub fn build_snapshot(view: &PageView, extracted_at: DateTime<Utc>) -> PageSnapshot {
    PageSnapshot {
        url: view.url.clone(),
        title: view.title.clone(),
        meta_description: view.meta_description.clone(),
        meta_keywords: view.meta_keywords.clone(),
        body_text_snippet: body_snippet(view),
        extracted_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_with_body(body: &str) -> PageView {
        PageView {
            url: "https://example.com".into(),
            title: "Example".into(),
            body_text: Some(body.into()),
            ..PageView::default()
        }
    }

    #[test]
    fn whitespace_only_changes_do_not_move_the_signature() {
        let a = view_with_body("hello   world");
        let b = view_with_body("hello\n\n  world ");
        assert_eq!(page_signature(&a), page_signature(&b));
    }

    #[test]
    fn content_changes_move_the_signature() {
        let a = view_with_body("hello world");
        let b = view_with_body("goodbye world");
        assert_ne!(page_signature(&a), page_signature(&b));
    }

    #[test]
    fn title_changes_move_the_signature() {
        let a = view_with_body("hello");
        let mut b = view_with_body("hello");
        b.title = "Example - updated".into();
        assert_ne!(page_signature(&a), page_signature(&b));
    }

    #[test]
    fn short_readability_output_falls_through_to_main() {
        let view = PageView {
            url: "https://example.com".into(),
            readable_text: Some("too short".into()),
            main_text: Some("the real main content of this page".into()),
            body_text: Some("body".into()),
            ..PageView::default()
        };
        let with_main = page_signature(&view);

        let mut without_main = view.clone();
        without_main.main_text = Some("something completely different".into());
        assert_ne!(with_main, page_signature(&without_main));
    }

    #[test]
    fn snippet_prefers_substantial_sources_and_stays_bounded() {
        let long_main = "m".repeat(3000);
        let view = PageView {
            url: "https://example.com".into(),
            readable_text: Some("short".into()),
            main_text: Some(long_main),
            body_text: Some("body fallback".into()),
            ..PageView::default()
        };
        let snapshot = build_snapshot(&view, Utc::now());
        assert_eq!(snapshot.body_text_snippet.chars().count(), SNIPPET_MAX_CHARS);
        assert!(snapshot.body_text_snippet.starts_with('m'));
    }

    #[test]
    fn snippet_falls_back_to_body_when_nothing_is_substantial() {
        let view = PageView {
            url: "https://example.com".into(),
            readable_text: Some("tiny".into()),
            main_text: Some("also tiny".into()),
            article_text: Some("still tiny".into()),
            body_text: Some("  body text wins here  ".into()),
            ..PageView::default()
        };
        let snapshot = build_snapshot(&view, Utc::now());
        assert_eq!(snapshot.body_text_snippet, "body text wins here");
    }

    #[test]
    fn rolling_hash_is_stable_and_discriminating() {
        assert_eq!(rolling_hash("abc"), rolling_hash("abc"));
        assert_ne!(rolling_hash("abc"), rolling_hash("abd"));
        assert_eq!(rolling_hash(""), format!("{:x}", 0u32));
    }
}
