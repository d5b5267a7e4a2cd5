use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Snapshot of session state as written to persistent storage at every
/// lifecycle transition, so an active session survives a process restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub focus_text: String,
    pub started_at: DateTime<Utc>,
    pub paused: bool,
    pub active_ms_baseline: u64,
    /// Wall-clock start of the currently open active segment; None while paused.
    pub segment_started_at: Option<DateTime<Utc>>,
}

/// One declared focus session. Active time is accounted as a baseline of
/// closed segments plus the currently running segment measured from a
/// monotonic anchor; the anchor only exists while the session is unpaused.
#[derive(Debug, Clone)]
pub struct FocusSession {
    pub focus_text: String,
    pub started_at: DateTime<Utc>,
    pub paused: bool,
    active_ms_baseline: u64,
    segment_anchor: Option<Instant>,
    segment_started_at: Option<DateTime<Utc>>,
}

impl FocusSession {
    pub fn begin(focus_text: String, started_at: DateTime<Utc>, now: Instant) -> Self {
        Self {
            focus_text,
            started_at,
            paused: false,
            active_ms_baseline: 0,
            segment_anchor: Some(now),
            segment_started_at: Some(started_at),
        }
    }

    /// Rebuilds an in-memory session from persisted state. For a session that
    /// was running when the process went down, the anchor is backdated by the
    /// wall-clock gap so the open segment keeps counting.
    pub fn restore(persisted: PersistedSession, now: Instant, wall_now: DateTime<Utc>) -> Self {
        let segment_anchor = if persisted.paused {
            None
        } else {
            let gap = persisted
                .segment_started_at
                .map(|started| wall_now.signed_duration_since(started))
                .and_then(|delta| delta.to_std().ok())
                .unwrap_or_default();
            Some(now.checked_sub(gap).unwrap_or(now))
        };

        Self {
            focus_text: persisted.focus_text,
            started_at: persisted.started_at,
            paused: persisted.paused,
            active_ms_baseline: persisted.active_ms_baseline,
            segment_anchor,
            segment_started_at: persisted.segment_started_at,
        }
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            focus_text: self.focus_text.clone(),
            started_at: self.started_at,
            paused: self.paused,
            active_ms_baseline: self.active_ms_baseline,
            segment_started_at: self.segment_started_at,
        }
    }

    /// Total active time so far, including the open segment if running.
    pub fn current_active_ms(&self, now: Instant) -> u64 {
        match (self.paused, self.segment_anchor) {
            (false, Some(anchor)) => self
                .active_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64),
            _ => self.active_ms_baseline,
        }
    }

    /// Folds the open segment into the baseline and freezes accounting.
    /// Returns the closed segment's duration, or None when already paused.
    pub fn pause(&mut self, now: Instant) -> Option<u64> {
        if self.paused {
            return None;
        }
        let segment_ms = self
            .segment_anchor
            .map(|anchor| now.saturating_duration_since(anchor).as_millis() as u64)
            .unwrap_or(0);
        self.active_ms_baseline = self.active_ms_baseline.saturating_add(segment_ms);
        self.paused = true;
        self.segment_anchor = None;
        self.segment_started_at = None;
        Some(segment_ms)
    }

    /// Re-anchors a new active segment. The baseline is additive and never
    /// reset, so elapsed time is preserved exactly across a pause of any
    /// length. Returns false when the session was not paused.
    pub fn resume(&mut self, now: Instant, wall_now: DateTime<Utc>) -> bool {
        if !self.paused {
            return false;
        }
        self.paused = false;
        self.segment_anchor = Some(now);
        self.segment_started_at = Some(wall_now);
        true
    }

    /// Closes the session. Returns (total active ms, duration of the segment
    /// closed by this call, if one was still open).
    pub fn end(mut self, now: Instant) -> (u64, Option<u64>) {
        let closed_segment = self.pause(now);
        (self.active_ms_baseline, closed_segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tokio::time::{self, Instant};

    #[tokio::test(start_paused = true)]
    async fn pause_resume_preserves_accumulated_time_exactly() {
        let mut session =
            FocusSession::begin("write thesis chapter".into(), Utc::now(), Instant::now());

        time::advance(Duration::from_secs(10)).await;
        let segment = session.pause(Instant::now()).unwrap();
        assert_eq!(segment, 10_000);
        assert_eq!(session.current_active_ms(Instant::now()), 10_000);

        // A pause of any length must not leak into the total.
        time::advance(Duration::from_secs(3600)).await;
        assert_eq!(session.current_active_ms(Instant::now()), 10_000);

        assert!(session.resume(Instant::now(), Utc::now()));
        time::advance(Duration::from_secs(5)).await;
        assert_eq!(session.current_active_ms(Instant::now()), 15_000);

        let (total, closed) = session.end(Instant::now());
        assert_eq!(total, 15_000);
        assert_eq!(closed, Some(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn double_pause_is_a_no_op() {
        let mut session = FocusSession::begin("focus".into(), Utc::now(), Instant::now());
        time::advance(Duration::from_secs(2)).await;
        assert!(session.pause(Instant::now()).is_some());
        assert!(session.pause(Instant::now()).is_none());
        assert_eq!(session.current_active_ms(Instant::now()), 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn ending_while_paused_closes_no_extra_segment() {
        let mut session = FocusSession::begin("focus".into(), Utc::now(), Instant::now());
        time::advance(Duration::from_secs(4)).await;
        session.pause(Instant::now());
        let (total, closed) = session.end(Instant::now());
        assert_eq!(total, 4_000);
        assert_eq!(closed, None);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_backdates_the_open_segment() {
        let wall_now = Utc::now();
        let persisted = PersistedSession {
            focus_text: "reading papers".into(),
            started_at: wall_now - ChronoDuration::seconds(120),
            paused: false,
            active_ms_baseline: 30_000,
            segment_started_at: Some(wall_now - ChronoDuration::seconds(60)),
        };

        let session = FocusSession::restore(persisted, Instant::now(), wall_now);
        assert_eq!(session.current_active_ms(Instant::now()), 90_000);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_of_paused_session_stays_frozen() {
        let wall_now = Utc::now();
        let persisted = PersistedSession {
            focus_text: "reading papers".into(),
            started_at: wall_now - ChronoDuration::seconds(300),
            paused: true,
            active_ms_baseline: 45_000,
            segment_started_at: None,
        };

        let session = FocusSession::restore(persisted, Instant::now(), wall_now);
        time::advance(Duration::from_secs(20)).await;
        assert_eq!(session.current_active_ms(Instant::now()), 45_000);
    }
}
