use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::messages::{CycleMode, IconState, ObserverCommand, TabIcon, TabId};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

struct TabEntry {
    commands: mpsc::UnboundedSender<ObserverCommand>,
    icon: TabIcon,
    last_url: Option<String>,
    active: bool,
}

/// Stand-in for the browser's tab surface: one observer command channel and
/// one icon per tab, plus which tab currently has focus.
pub(crate) struct TabRegistry {
    tabs: Mutex<HashMap<TabId, TabEntry>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self {
            tabs: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, tab_id: TabId, commands: mpsc::UnboundedSender<ObserverCommand>) {
        self.lock().insert(
            tab_id,
            TabEntry {
                commands,
                icon: TabIcon::neutral(),
                last_url: None,
                active: false,
            },
        );
    }

    pub fn remove(&self, tab_id: TabId) {
        self.lock().remove(&tab_id);
    }

    pub fn set_active(&self, tab_id: TabId) {
        let mut tabs = self.lock();
        for (id, entry) in tabs.iter_mut() {
            entry.active = *id == tab_id;
        }
    }

    pub fn is_active(&self, tab_id: TabId) -> bool {
        self.lock().get(&tab_id).is_some_and(|entry| entry.active)
    }

    pub fn active_tab(&self) -> Option<(TabId, Option<String>)> {
        self.lock()
            .iter()
            .find(|(_, entry)| entry.active)
            .map(|(id, entry)| (*id, entry.last_url.clone()))
    }

    pub fn note_url(&self, tab_id: TabId, url: &str) {
        if let Some(entry) = self.lock().get_mut(&tab_id) {
            entry.last_url = Some(url.to_string());
        }
    }

    /// Fire-and-forget command delivery; a closed channel (tab torn down
    /// mid-flight) is logged and swallowed.
    pub fn send(&self, tab_id: TabId, command: ObserverCommand) -> bool {
        let tabs = self.lock();
        let Some(entry) = tabs.get(&tab_id) else {
            log_warn!("tab {tab_id} not registered, command dropped");
            return false;
        };
        if entry.commands.send(command).is_err() {
            log_warn!("tab {tab_id} observer channel closed, command dropped");
            return false;
        }
        true
    }

    pub fn set_icon(
        &self,
        tab_id: TabId,
        state: IconState,
        overlay: Option<CycleMode>,
    ) -> Option<TabIcon> {
        let mut tabs = self.lock();
        let entry = tabs.get_mut(&tab_id)?;
        entry.icon = TabIcon { state, overlay };
        Some(entry.icon)
    }

    /// Repaints every tab (session end, cycle-mode flips). Returns the new
    /// per-tab icons for broadcasting.
    pub fn repaint_all(
        &self,
        state: Option<IconState>,
        overlay: Option<CycleMode>,
    ) -> Vec<(TabId, TabIcon)> {
        let mut tabs = self.lock();
        let mut repainted = Vec::with_capacity(tabs.len());
        for (id, entry) in tabs.iter_mut() {
            entry.icon = TabIcon {
                state: state.unwrap_or(entry.icon.state),
                overlay,
            };
            repainted.push((*id, entry.icon));
        }
        repainted
    }

    pub fn icon(&self, tab_id: TabId) -> Option<TabIcon> {
        self.lock().get(&tab_id).map(|entry| entry.icon)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TabId, TabEntry>> {
        match self.tabs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
