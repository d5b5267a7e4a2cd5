mod assessment;
mod session;
mod snapshot;

pub use assessment::{Assessment, AssessmentRecord};
pub use session::{FocusSession, PersistedSession};
pub use snapshot::{PageSnapshot, PageView};
