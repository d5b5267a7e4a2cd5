use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::messages::PageEvent;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const FOCUS_QUOTES: [&str; 5] = [
    "The successful warrior is the average man, with laser-like focus. - Bruce Lee",
    "Concentrate all your thoughts upon the work at hand. The sun's rays do not burn until brought to a focus. - Alexander Graham Bell",
    "Focus on being productive instead of busy. - Tim Ferriss",
    "The key to success is to focus our conscious mind on things we desire not things we fear. - Brian Tracy",
    "Stay focused, go after your dreams and keep moving toward your goals. - LL Cool J",
];

/// Contents of a visible off-focus prompt. The go-back action is only offered
/// when the session has a usable last-relevant URL.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OffFocusPrompt {
    pub last_relevant_url: Option<String>,
    pub quote: &'static str,
    pub shown_at: DateTime<Utc>,
}

impl OffFocusPrompt {
    pub fn offers_go_back(&self) -> bool {
        self.last_relevant_url.is_some()
    }
}

#[derive(Debug)]
enum PromptState {
    Hidden,
    Shown(OffFocusPrompt),
}

/// The redirect prompt's two-state machine. At most one prompt is ever
/// visible; showing a new one replaces the old.
pub struct PromptController {
    state: Mutex<PromptState>,
    events: mpsc::UnboundedSender<PageEvent>,
}

impl PromptController {
    pub fn new(events: mpsc::UnboundedSender<PageEvent>) -> Self {
        Self {
            state: Mutex::new(PromptState::Hidden),
            events,
        }
    }

    pub fn show(&self, last_relevant_url: Option<String>) {
        let last_relevant_url = last_relevant_url.filter(|url| !url.trim().is_empty());
        let prompt = OffFocusPrompt {
            last_relevant_url,
            quote: FOCUS_QUOTES[rand::thread_rng().gen_range(0..FOCUS_QUOTES.len())],
            shown_at: Utc::now(),
        };

        let mut state = self.lock_state();
        if matches!(*state, PromptState::Shown(_)) {
            log_info!("replacing existing off-focus prompt");
        }
        *state = PromptState::Shown(prompt);
    }

    pub fn dismiss(&self) {
        *self.lock_state() = PromptState::Hidden;
    }

    /// Hides the prompt and returns the URL to navigate back to, when the
    /// prompt offered one.
    pub fn go_back(&self) -> Option<String> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, PromptState::Hidden) {
            PromptState::Shown(prompt) => prompt.last_relevant_url,
            PromptState::Hidden => None,
        }
    }

    /// "Add this page to focus": requests a whitelist mutation from the
    /// coordinator and hides the prompt.
    pub fn add_current_to_whitelist(&self, current_url: &str) {
        if self
            .events
            .send(PageEvent::AddToWhitelist {
                url: current_url.to_string(),
            })
            .is_err()
        {
            log_warn!("coordinator channel closed, whitelist request dropped");
        }
        self.dismiss();
    }

    pub fn current(&self) -> Option<OffFocusPrompt> {
        match &*self.lock_state() {
            PromptState::Shown(prompt) => Some(prompt.clone()),
            PromptState::Hidden => None,
        }
    }

    pub fn is_shown(&self) -> bool {
        matches!(*self.lock_state(), PromptState::Shown(_))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PromptState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (PromptController, mpsc::UnboundedReceiver<PageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PromptController::new(tx), rx)
    }

    #[test]
    fn showing_replaces_any_existing_prompt() {
        let (prompt, _rx) = controller();
        prompt.show(Some("https://first.com".into()));
        prompt.show(Some("https://second.com".into()));

        let current = prompt.current().unwrap();
        assert_eq!(current.last_relevant_url.as_deref(), Some("https://second.com"));
        assert!(prompt.is_shown());
    }

    #[test]
    fn empty_last_relevant_url_disables_go_back() {
        let (prompt, _rx) = controller();
        prompt.show(Some("   ".into()));
        assert!(!prompt.current().unwrap().offers_go_back());
        assert!(prompt.go_back().is_none());
        assert!(!prompt.is_shown());
    }

    #[test]
    fn go_back_hides_and_returns_the_target() {
        let (prompt, _rx) = controller();
        prompt.show(Some("https://work.example".into()));
        assert_eq!(prompt.go_back().as_deref(), Some("https://work.example"));
        assert!(!prompt.is_shown());
    }

    #[test]
    fn whitelist_action_notifies_coordinator_and_hides() {
        let (prompt, mut rx) = controller();
        prompt.show(None);
        prompt.add_current_to_whitelist("https://current.example/page");

        match rx.try_recv().unwrap() {
            PageEvent::AddToWhitelist { url } => {
                assert_eq!(url, "https://current.example/page");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!prompt.is_shown());
    }

    #[test]
    fn dismiss_is_idempotent() {
        let (prompt, _rx) = controller();
        prompt.dismiss();
        prompt.show(None);
        prompt.dismiss();
        prompt.dismiss();
        assert!(!prompt.is_shown());
    }
}
