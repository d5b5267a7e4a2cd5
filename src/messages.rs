use serde::{Deserialize, Serialize};

use crate::models::PageSnapshot;

/// Identifies one browser tab context. Each tab runs its own page observer.
pub type TabId = u32;

/// What set a stabilization watch in motion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TriggerSource {
    InitialLoad,
    HistoryPushState,
    HistoryReplaceState,
    HistoryPopState,
    MutationEvent,
    BackgroundRequest,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::InitialLoad => "initial_load",
            TriggerSource::HistoryPushState => "history_pushState",
            TriggerSource::HistoryReplaceState => "history_replaceState",
            TriggerSource::HistoryPopState => "history_popstate",
            TriggerSource::MutationEvent => "mutation_event",
            TriggerSource::BackgroundRequest => "background_request",
        }
    }
}

/// How a watch terminated. Both outcomes produce a snapshot; the reason is
/// threaded through for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SettleReason {
    Stabilized,
    MaxWaitTimeout,
}

impl SettleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettleReason::Stabilized => "stabilized",
            SettleReason::MaxWaitTimeout => "max_wait_timeout",
        }
    }
}

/// Coordinator -> observer commands, one channel per tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObserverCommand {
    #[serde(rename_all = "camelCase")]
    RequestContentUpdate { source_of_request: String },
    #[serde(rename_all = "camelCase")]
    ShowOffFocusModal { last_relevant_url: Option<String> },
}

/// Observer -> coordinator events (fire and forget).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageEvent {
    #[serde(rename_all = "camelCase")]
    ContentUpdated {
        tab_id: TabId,
        data: PageSnapshot,
        triggering_source: String,
        request_id: String,
    },
    #[serde(rename_all = "camelCase")]
    AddToWhitelist { url: String },
}

/// Badge color for a tab's toolbar icon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IconState {
    Neutral,
    Relevant,
    Irrelevant,
    Error,
    LimitReached,
}

/// Secondary work/break indicator layered over the icon. Driven by an external
/// cycle scheduler; the coordinator only renders it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CycleMode {
    Work,
    Break,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabIcon {
    pub state: IconState,
    pub overlay: Option<CycleMode>,
}

impl TabIcon {
    pub fn neutral() -> Self {
        Self {
            state: IconState::Neutral,
            overlay: None,
        }
    }
}

/// Coordinator -> UI broadcast. Subscribers get every event; persistence is
/// handled separately so the UI never has to watch storage writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiEvent {
    #[serde(rename_all = "camelCase")]
    SessionStarted { focus: String },
    SessionEnded,
    #[serde(rename_all = "camelCase")]
    SessionPaused { total_active_ms: u64 },
    SessionResumed,
    #[serde(rename_all = "camelCase")]
    AssessmentResultText { assessment_text: String },
    #[serde(rename_all = "camelCase")]
    IconChanged { tab_id: TabId, icon: TabIcon },
}

/// Synchronous-style reply to a pause request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PauseResponse {
    #[serde(rename_all = "camelCase")]
    Paused { total_active_ms: u64 },
    AlreadyPausedOrNoSession,
}

/// Synchronous-style reply to a resume request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResumeResponse {
    Resumed,
    NotPaused,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_sources_serialize_like_wire_strings() {
        assert_eq!(TriggerSource::HistoryPushState.as_str(), "history_pushState");
        assert_eq!(TriggerSource::MutationEvent.as_str(), "mutation_event");
    }

    #[test]
    fn observer_command_wire_shape() {
        let cmd = ObserverCommand::RequestContentUpdate {
            source_of_request: "tabs.onActivated".into(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "REQUEST_CONTENT_UPDATE");
        assert_eq!(json["sourceOfRequest"], "tabs.onActivated");
    }

    #[test]
    fn pause_response_carries_status_tag() {
        let json = serde_json::to_value(PauseResponse::Paused {
            total_active_ms: 1500,
        })
        .unwrap();
        assert_eq!(json["status"], "paused");
        assert_eq!(json["totalActiveMs"], 1500);
    }
}
