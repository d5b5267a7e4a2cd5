use anyhow::Result;
use async_trait::async_trait;

use crate::models::PageView;

/// The observer's window onto the live page. Implementations wrap the actual
/// DOM (or a fixture in tests); the stabilization logic only ever sees this.
#[async_trait]
pub trait PageProbe: Send + Sync {
    /// Current location, cheap enough to call on every trigger.
    async fn current_url(&self) -> Result<String>;

    /// Full read of the page's classifiable surface.
    async fn current_view(&self) -> Result<PageView>;
}

/// One batch of DOM mutations as reported by the host page's mutation
/// observer, reduced to the two signals the watcher cares about.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationBatch {
    pub title_changed: bool,
    /// Nodes were added/removed or character data changed in content regions.
    pub content_nodes_changed: bool,
}

impl MutationBatch {
    pub fn is_significant(&self) -> bool {
        self.title_changed || self.content_nodes_changed
    }
}
