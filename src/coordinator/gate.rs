use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Outcome of asking the gate whether a URL may proceed to classification.
pub(crate) enum GateDecision {
    /// Lock acquired; released when the guard drops, on every exit path.
    Proceed(InFlightGuard),
    /// Another attempt for this exact URL is still outstanding.
    InFlight,
    /// The URL was processed too recently.
    Cooldown,
}

#[derive(Default)]
struct GateState {
    in_flight: HashSet<String>,
    last_processed: HashMap<String, Instant>,
}

/// Per-URL admission control: at most one outstanding classification per URL,
/// and a minimum spacing between attempts for the same URL. Different URLs
/// pass through independently.
pub(crate) struct RequestGate {
    state: Arc<Mutex<GateState>>,
    cooldown: Duration,
}

impl RequestGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::default())),
            cooldown,
        }
    }

    pub fn admit(&self, url: &str, now: Instant) -> GateDecision {
        let mut state = lock(&self.state);

        if state.in_flight.contains(url) {
            return GateDecision::InFlight;
        }
        if let Some(processed_at) = state.last_processed.get(url) {
            if now.saturating_duration_since(*processed_at) < self.cooldown {
                return GateDecision::Cooldown;
            }
        }

        state.in_flight.insert(url.to_string());
        state.last_processed.insert(url.to_string(), now);
        GateDecision::Proceed(InFlightGuard {
            state: Arc::clone(&self.state),
            url: url.to_string(),
        })
    }

    /// Records a processed timestamp without taking the lock (whitelist hits
    /// never classify but still count for cooldown spacing).
    pub fn mark_processed(&self, url: &str, now: Instant) {
        lock(&self.state).last_processed.insert(url.to_string(), now);
    }

    /// Forgets a URL entirely so the next snapshot re-evaluates immediately
    /// (used when the URL just entered the whitelist).
    pub fn forget_url(&self, url: &str) {
        let mut state = lock(&self.state);
        state.in_flight.remove(url);
        state.last_processed.remove(url);
    }

    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.in_flight.clear();
        state.last_processed.clear();
    }
}

/// RAII release of the per-URL lock. Dropping on panic or early return keeps
/// the URL classifiable for the rest of the session.
pub(crate) struct InFlightGuard {
    state: Arc<Mutex<GateState>>,
    url: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.state).in_flight.remove(&self.url);
    }
}

fn lock(state: &Arc<Mutex<GateState>>) -> MutexGuard<'_, GateState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_attempt_for_locked_url_is_rejected() {
        let gate = RequestGate::new(Duration::from_millis(3000));
        let guard = match gate.admit("https://a.com", Instant::now()) {
            GateDecision::Proceed(guard) => guard,
            _ => panic!("first attempt should proceed"),
        };

        assert!(matches!(
            gate.admit("https://a.com", Instant::now()),
            GateDecision::InFlight
        ));
        // A different URL is unaffected by the lock.
        assert!(matches!(
            gate.admit("https://b.com", Instant::now()),
            GateDecision::Proceed(_)
        ));
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn released_lock_still_leaves_the_cooldown() {
        let gate = RequestGate::new(Duration::from_millis(3000));
        match gate.admit("https://a.com", Instant::now()) {
            GateDecision::Proceed(guard) => drop(guard),
            _ => panic!("first attempt should proceed"),
        }

        assert!(matches!(
            gate.admit("https://a.com", Instant::now()),
            GateDecision::Cooldown
        ));

        tokio::time::advance(Duration::from_millis(3100)).await;
        assert!(matches!(
            gate.admit("https://a.com", Instant::now()),
            GateDecision::Proceed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn forget_url_clears_both_lock_and_cooldown() {
        let gate = RequestGate::new(Duration::from_millis(3000));
        gate.mark_processed("https://a.com", Instant::now());
        assert!(matches!(
            gate.admit("https://a.com", Instant::now()),
            GateDecision::Cooldown
        ));

        gate.forget_url("https://a.com");
        assert!(matches!(
            gate.admit("https://a.com", Instant::now()),
            GateDecision::Proceed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_releases_on_drop_even_mid_panic_unwind() {
        let gate = RequestGate::new(Duration::from_millis(10));
        {
            let _guard = match gate.admit("https://a.com", Instant::now()) {
                GateDecision::Proceed(guard) => guard,
                _ => panic!("should proceed"),
            };
            // guard dropped at scope end
        }
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(matches!(
            gate.admit("https://a.com", Instant::now()),
            GateDecision::Proceed(_)
        ));
    }
}
