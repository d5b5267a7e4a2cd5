use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::Assessment;

#[derive(Debug, Clone, Copy)]
struct CachedVerdict {
    assessment: Assessment,
    cached_at: Instant,
}

/// The coordinator's two assessment caches.
///
/// The sticky cache is URL-keyed, short-lived, and session-scoped; its only
/// job is absorbing a single Irrelevant flicker right after a page was
/// confirmed on-topic. The global cache is (url, focus)-keyed with a longer
/// TTL and survives session end, existing purely to skip redundant network
/// calls. Only conclusive verdicts are ever stored.
pub(crate) struct AssessmentCaches {
    sticky: HashMap<String, CachedVerdict>,
    global: HashMap<(String, String), CachedVerdict>,
    sticky_ttl: Duration,
    global_ttl: Duration,
    global_max_entries: usize,
}

impl AssessmentCaches {
    pub fn new(sticky_ttl: Duration, global_ttl: Duration, global_max_entries: usize) -> Self {
        Self {
            sticky: HashMap::new(),
            global: HashMap::new(),
            sticky_ttl,
            global_ttl,
            global_max_entries,
        }
    }

    /// Stores a fresh verdict in both caches. Non-conclusive assessments are
    /// ignored so errors stay retryable.
    pub fn record(&mut self, url: &str, focus: &str, assessment: Assessment, now: Instant) {
        if !assessment.is_conclusive() {
            return;
        }
        let entry = CachedVerdict {
            assessment,
            cached_at: now,
        };
        self.sticky.insert(url.to_string(), entry);
        self.global
            .insert((url.to_string(), focus.to_string()), entry);
        if self.global.len() > self.global_max_entries {
            self.collect_garbage(now);
        }
    }

    /// Sticky-only update, used by paths that bypass classification
    /// (whitelist hits, global-cache hits).
    pub fn record_sticky(&mut self, url: &str, assessment: Assessment, now: Instant) {
        if !assessment.is_conclusive() {
            return;
        }
        self.sticky.insert(
            url.to_string(),
            CachedVerdict {
                assessment,
                cached_at: now,
            },
        );
    }

    /// True when the URL carries a live "Relevant" verdict. Stale entries and
    /// non-Relevant entries never trigger the override.
    pub fn sticky_relevant(&self, url: &str, now: Instant) -> bool {
        self.sticky.get(url).is_some_and(|entry| {
            entry.assessment == Assessment::Relevant
                && now.saturating_duration_since(entry.cached_at) < self.sticky_ttl
        })
    }

    pub fn global_lookup(&self, url: &str, focus: &str, now: Instant) -> Option<Assessment> {
        self.global
            .get(&(url.to_string(), focus.to_string()))
            .filter(|entry| now.saturating_duration_since(entry.cached_at) < self.global_ttl)
            .map(|entry| entry.assessment)
    }

    /// Session teardown: sticky verdicts must not leak into the next focus.
    pub fn clear_sticky(&mut self) {
        self.sticky.clear();
    }

    /// Drops expired global entries; if the cache is still over the bound,
    /// evicts the oldest survivors.
    fn collect_garbage(&mut self, now: Instant) {
        let ttl = self.global_ttl;
        self.global
            .retain(|_, entry| now.saturating_duration_since(entry.cached_at) < ttl);

        if self.global.len() > self.global_max_entries {
            let mut by_age: Vec<(Instant, (String, String))> = self
                .global
                .iter()
                .map(|(key, entry)| (entry.cached_at, key.clone()))
                .collect();
            by_age.sort_by_key(|(cached_at, _)| *cached_at);
            let excess = self.global.len() - self.global_max_entries;
            for (_, key) in by_age.into_iter().take(excess) {
                self.global.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn global_len(&self) -> usize {
        self.global.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn caches() -> AssessmentCaches {
        AssessmentCaches::new(
            Duration::from_millis(7000),
            Duration::from_secs(600),
            512,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_relevant_expires_after_its_ttl() {
        let mut caches = caches();
        caches.record("https://a.com", "focus", Assessment::Relevant, Instant::now());

        advance(Duration::from_millis(6000)).await;
        assert!(caches.sticky_relevant("https://a.com", Instant::now()));

        advance(Duration::from_millis(1500)).await;
        assert!(!caches.sticky_relevant("https://a.com", Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn sticky_never_fires_for_non_relevant_entries() {
        let mut caches = caches();
        caches.record(
            "https://a.com",
            "focus",
            Assessment::Irrelevant,
            Instant::now(),
        );
        assert!(!caches.sticky_relevant("https://a.com", Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn inconclusive_assessments_are_not_cached() {
        let mut caches = caches();
        caches.record("https://a.com", "focus", Assessment::Error, Instant::now());
        caches.record(
            "https://b.com",
            "focus",
            Assessment::LimitReached,
            Instant::now(),
        );
        assert!(caches
            .global_lookup("https://a.com", "focus", Instant::now())
            .is_none());
        assert!(caches
            .global_lookup("https://b.com", "focus", Instant::now())
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn global_cache_is_keyed_by_url_and_focus() {
        let mut caches = caches();
        caches.record("https://a.com", "rust", Assessment::Relevant, Instant::now());

        assert_eq!(
            caches.global_lookup("https://a.com", "rust", Instant::now()),
            Some(Assessment::Relevant)
        );
        assert!(caches
            .global_lookup("https://a.com", "gardening", Instant::now())
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn global_entries_expire_independently_of_session_end() {
        let mut caches = caches();
        caches.record("https://a.com", "rust", Assessment::Irrelevant, Instant::now());
        caches.clear_sticky();

        // Session teardown leaves the global entry intact...
        assert_eq!(
            caches.global_lookup("https://a.com", "rust", Instant::now()),
            Some(Assessment::Irrelevant)
        );

        // ...until its own TTL runs out.
        advance(Duration::from_secs(601)).await;
        assert!(caches
            .global_lookup("https://a.com", "rust", Instant::now())
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_collection_bounds_the_global_cache() {
        let mut caches = AssessmentCaches::new(
            Duration::from_millis(7000),
            Duration::from_secs(600),
            10,
        );

        for i in 0..10 {
            caches.record(
                &format!("https://site{i}.com"),
                "focus",
                Assessment::Relevant,
                Instant::now(),
            );
            advance(Duration::from_millis(10)).await;
        }
        assert_eq!(caches.global_len(), 10);

        // The 11th entry trips GC; the oldest survivor is evicted.
        caches.record("https://overflow.com", "focus", Assessment::Relevant, Instant::now());
        assert_eq!(caches.global_len(), 10);
        assert!(caches
            .global_lookup("https://site0.com", "focus", Instant::now())
            .is_none());
        assert!(caches
            .global_lookup("https://overflow.com", "focus", Instant::now())
            .is_some());
    }
}
