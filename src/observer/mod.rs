mod controller;
mod debounce;
mod probe;
mod prompt;
mod signature;
mod stabilizer;

pub use controller::PageObserver;
pub use probe::{MutationBatch, PageProbe};
pub use prompt::{OffFocusPrompt, PromptController};
pub use signature::{page_signature, rolling_hash};
