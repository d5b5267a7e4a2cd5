mod classify;
mod config;
mod coordinator;
mod messages;
mod models;
mod observer;
mod store;
mod utils;

pub use classify::{ClassifyError, ClassifyRequest, Classifier, HttpClassifier, Verdict};
pub use config::{CoordinatorConfig, StabilizerConfig};
pub use coordinator::SessionCoordinator;
pub use messages::{
    CycleMode, IconState, ObserverCommand, PageEvent, PauseResponse, ResumeResponse, SettleReason,
    TabIcon, TabId, TriggerSource, UiEvent,
};
pub use models::{Assessment, AssessmentRecord, FocusSession, PageSnapshot, PageView, PersistedSession};
pub use observer::{
    page_signature, rolling_hash, MutationBatch, OffFocusPrompt, PageObserver, PageProbe,
    PromptController,
};
pub use store::{today_key, Store};
pub use utils::logging::init_logging;
