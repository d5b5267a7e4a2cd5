use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::classify::{Classifier, ClassifyError, ClassifyRequest, Verdict};
use crate::config::CoordinatorConfig;
use crate::messages::{
    CycleMode, IconState, ObserverCommand, PageEvent, PauseResponse, ResumeResponse, TabIcon,
    TabId, UiEvent,
};
use crate::models::{Assessment, AssessmentRecord, FocusSession, PageSnapshot};
use crate::store::{today_key, Store};

use super::cache::AssessmentCaches;
use super::gate::{GateDecision, InFlightGuard, RequestGate};
use super::tabs::TabRegistry;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const UI_EVENT_CAPACITY: usize = 64;

type PendingKey = (String, String);
type PendingMap = Mutex<HashMap<PendingKey, watch::Receiver<Option<Assessment>>>>;

/// Owns all session state and the gating pipeline. One instance per process;
/// every mutable map and cache lives behind this struct and is torn down at
/// session end (session-scoped state) or lives for the process (global cache,
/// quota latch).
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    store: Store,
    classifier: Arc<dyn Classifier>,
    session: Mutex<Option<FocusSession>>,
    last_relevant_url: Mutex<Option<String>>,
    last_assessment: Mutex<Option<AssessmentRecord>>,
    caches: Mutex<AssessmentCaches>,
    gate: RequestGate,
    pending: PendingMap,
    classify_slots: Arc<Semaphore>,
    limit_reached: AtomicBool,
    cycle_mode: Mutex<Option<CycleMode>>,
    tabs: TabRegistry,
    ui_events: broadcast::Sender<UiEvent>,
}

impl SessionCoordinator {
    pub async fn new(
        config: CoordinatorConfig,
        store: Store,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Arc<Self>> {
        config.validate().context("invalid coordinator config")?;

        let (ui_events, _) = broadcast::channel(UI_EVENT_CAPACITY);
        let coordinator = Arc::new(Self {
            caches: Mutex::new(AssessmentCaches::new(
                config.sticky_relevant_ttl,
                config.global_cache_ttl,
                config.global_cache_max_entries,
            )),
            gate: RequestGate::new(config.process_cooldown),
            classify_slots: Arc::new(Semaphore::new(config.max_concurrent_classifications)),
            config,
            store,
            classifier,
            session: Mutex::new(None),
            last_relevant_url: Mutex::new(None),
            last_assessment: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            limit_reached: AtomicBool::new(false),
            cycle_mode: Mutex::new(None),
            tabs: TabRegistry::new(),
            ui_events,
        });

        coordinator.restore_persisted_state().await?;
        Ok(coordinator)
    }

    /// Reload what a previous process wrote, so an active session continues
    /// across a restart.
    async fn restore_persisted_state(&self) -> Result<()> {
        if let Some(persisted) = self.store.load_session().await? {
            log_info!("restored focus session '{}' from store", persisted.focus_text);
            *lock(&self.session) = Some(FocusSession::restore(persisted, Instant::now(), Utc::now()));
        }
        if let Some(url) = self.store.last_relevant_url().await? {
            *lock(&self.last_relevant_url) = Some(url);
        }
        Ok(())
    }

    pub fn subscribe_ui(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_events.subscribe()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // --- tab surface ---

    pub fn register_tab(&self, tab_id: TabId, commands: mpsc::UnboundedSender<ObserverCommand>) {
        self.tabs.register(tab_id, commands);
    }

    pub fn remove_tab(&self, tab_id: TabId) {
        self.tabs.remove(tab_id);
    }

    /// Tab activation re-checks the newly focused page, the same as any
    /// browser-level navigation event.
    pub fn set_active_tab(&self, tab_id: TabId) {
        self.tabs.set_active(tab_id);
        if lock(&self.session).is_some() {
            self.tabs.send(
                tab_id,
                ObserverCommand::RequestContentUpdate {
                    source_of_request: "tabs.onActivated".into(),
                },
            );
        }
    }

    // --- session lifecycle ---

    pub async fn start_session(&self, focus: &str) -> Result<()> {
        let focus = focus.trim();
        if focus.is_empty() {
            bail!("focus text must not be empty");
        }

        let session = FocusSession::begin(focus.to_string(), Utc::now(), Instant::now());
        let persisted = session.to_persisted();
        {
            let mut guard = lock(&self.session);
            if guard.is_some() {
                log_warn!("starting a new session over an active one");
            }
            *guard = Some(session);
        }
        *lock(&self.last_assessment) = None;
        *lock(&self.last_relevant_url) = None;

        self.store.save_session(&persisted).await?;
        self.store.clear_assessment_state().await?;

        let _ = self.ui_events.send(UiEvent::SessionStarted {
            focus: focus.to_string(),
        });
        log_info!("session started with focus '{focus}'");
        self.request_active_tab_update("SESSION_STARTED");
        Ok(())
    }

    pub async fn pause_session(&self) -> Result<PauseResponse> {
        let (closed_segment, total_active_ms, persisted) = {
            let mut guard = lock(&self.session);
            let Some(session) = guard.as_mut() else {
                return Ok(PauseResponse::AlreadyPausedOrNoSession);
            };
            let Some(segment) = session.pause(Instant::now()) else {
                return Ok(PauseResponse::AlreadyPausedOrNoSession);
            };
            (
                segment,
                session.current_active_ms(Instant::now()),
                session.to_persisted(),
            )
        };

        self.store
            .add_daily_focus(&today_key(Utc::now()), closed_segment)
            .await?;
        self.store.save_session(&persisted).await?;

        log_info!("session paused at {total_active_ms}ms active");
        let _ = self.ui_events.send(UiEvent::SessionPaused { total_active_ms });
        Ok(PauseResponse::Paused { total_active_ms })
    }

    pub async fn resume_session(&self) -> Result<ResumeResponse> {
        let persisted = {
            let mut guard = lock(&self.session);
            let Some(session) = guard.as_mut() else {
                return Ok(ResumeResponse::NotPaused);
            };
            if !session.resume(Instant::now(), Utc::now()) {
                return Ok(ResumeResponse::NotPaused);
            }
            session.to_persisted()
        };

        self.store.save_session(&persisted).await?;
        log_info!("session resumed");
        let _ = self.ui_events.send(UiEvent::SessionResumed);
        Ok(ResumeResponse::Resumed)
    }

    /// Ends the session: folds the open segment into the daily ledger, clears
    /// every piece of session-scoped state, and resets the UI to neutral. The
    /// persisted whitelist is deliberately left for the UI collaborator.
    pub async fn end_session(&self) -> Result<()> {
        let Some(session) = lock(&self.session).take() else {
            log_info!("no active session to end");
            return Ok(());
        };

        let (total_active_ms, closed_segment) = session.end(Instant::now());
        if let Some(segment) = closed_segment {
            self.store
                .add_daily_focus(&today_key(Utc::now()), segment)
                .await?;
        }

        *lock(&self.last_relevant_url) = None;
        *lock(&self.last_assessment) = None;
        lock(&self.caches).clear_sticky();
        self.gate.reset();

        self.store.clear_session().await?;

        let overlay = *lock(&self.cycle_mode);
        for (tab_id, icon) in self.tabs.repaint_all(Some(IconState::Neutral), overlay) {
            let _ = self.ui_events.send(UiEvent::IconChanged { tab_id, icon });
        }
        let _ = self.ui_events.send(UiEvent::SessionEnded);
        log_info!("session ended with {total_active_ms}ms active");
        Ok(())
    }

    // --- whitelist ---

    pub async fn add_to_whitelist(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            log_warn!("whitelist request without URL ignored");
            return Ok(());
        }

        if !self.store.add_to_whitelist(url).await? {
            log_info!("URL already in whitelist: {url}");
            return Ok(());
        }
        log_info!("added to whitelist: {url}");

        // The active tab sitting on this URL gets re-evaluated immediately;
        // its cooldown and lock are history now that the verdict is forced.
        if let Some((tab_id, Some(active_url))) = self.tabs.active_tab() {
            if active_url == url {
                self.gate.forget_url(url);
                self.tabs.send(
                    tab_id,
                    ObserverCommand::RequestContentUpdate {
                        source_of_request: "WHITELIST_ADD_REPROCESS".into(),
                    },
                );
            }
        }
        Ok(())
    }

    pub async fn clear_whitelist(&self) -> Result<()> {
        self.store.clear_whitelist().await
    }

    // --- external toggles ---

    /// Work/break indicator from the cycle scheduler; repaints every tab.
    pub fn set_cycle_mode(&self, mode: Option<CycleMode>) {
        *lock(&self.cycle_mode) = mode;
        for (tab_id, icon) in self.tabs.repaint_all(None, mode) {
            let _ = self.ui_events.send(UiEvent::IconChanged { tab_id, icon });
        }
    }

    /// Out-of-band reset after an upgrade; classification resumes on the next
    /// natural trigger.
    pub fn reset_usage_limit(&self) {
        self.limit_reached.store(false, Ordering::SeqCst);
        log_info!("usage limit latch cleared");
    }

    pub fn is_limit_reached(&self) -> bool {
        self.limit_reached.load(Ordering::SeqCst)
    }

    // --- introspection for the UI collaborator ---

    pub fn session_focus(&self) -> Option<String> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.focus_text.clone())
    }

    pub fn session_active_ms(&self) -> Option<u64> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.current_active_ms(Instant::now()))
    }

    pub fn last_relevant_url(&self) -> Option<String> {
        lock(&self.last_relevant_url).clone()
    }

    pub fn last_assessment(&self) -> Option<AssessmentRecord> {
        lock(&self.last_assessment).clone()
    }

    pub fn tab_icon(&self, tab_id: TabId) -> Option<TabIcon> {
        self.tabs.icon(tab_id)
    }

    pub async fn focused_today_ms(&self) -> Result<u64> {
        self.store.daily_focus_total(&today_key(Utc::now())).await
    }

    // --- event intake ---

    /// Drains observer events until shutdown. Snapshots are handled on their
    /// own tasks so different URLs classify concurrently up to the cap.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PageEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(PageEvent::ContentUpdated { tab_id, data, triggering_source, request_id }) => {
                            let coordinator = Arc::clone(&this);
                            tokio::spawn(async move {
                                coordinator
                                    .handle_snapshot(tab_id, data, &triggering_source, &request_id)
                                    .await;
                            });
                        }
                        Some(PageEvent::AddToWhitelist { url }) => {
                            if let Err(err) = this.add_to_whitelist(&url).await {
                                log_error!("whitelist update failed for {url}: {err:#}");
                            }
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => {
                        log_info!("coordinator event loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// The gating pipeline (short-circuits in order): no session, malformed
    /// snapshot, whitelist, in-flight lock, cooldown, then classification.
    pub async fn handle_snapshot(
        &self,
        tab_id: TabId,
        snapshot: PageSnapshot,
        triggering_source: &str,
        request_id: &str,
    ) {
        let focus = {
            let guard = lock(&self.session);
            match guard.as_ref() {
                Some(session) if !session.paused => session.focus_text.clone(),
                Some(_) => {
                    log_info!("session paused, ignoring snapshot for {}", snapshot.url);
                    return;
                }
                None => {
                    log_info!("no active session, ignoring snapshot ({triggering_source})");
                    return;
                }
            }
        };

        if snapshot.url.trim().is_empty() {
            log_warn!("snapshot without URL dropped ({triggering_source}, id {request_id})");
            return;
        }

        let url = snapshot.url.clone();
        self.tabs.note_url(tab_id, &url);

        match self.store.whitelist_contains(&url).await {
            Ok(true) => {
                log_info!("{url} is whitelisted, forcing Relevant without network");
                self.gate.mark_processed(&url, Instant::now());
                lock(&self.caches).record_sticky(&url, Assessment::Relevant, Instant::now());
                self.finalize_assessment(tab_id, &url, Assessment::Relevant, false)
                    .await;
                return;
            }
            Ok(false) => {}
            Err(err) => {
                log_error!("whitelist lookup failed for {url}: {err:#}");
            }
        }

        let guard = match self.gate.admit(&url, Instant::now()) {
            GateDecision::Proceed(guard) => guard,
            GateDecision::InFlight => {
                log_info!("{url} already in flight, dropping ({triggering_source})");
                return;
            }
            GateDecision::Cooldown => {
                log_info!("{url} in cooldown, dropping ({triggering_source})");
                self.rebroadcast_last_assessment(tab_id).await;
                return;
            }
        };

        self.classify_and_publish(tab_id, snapshot, &focus, guard)
            .await;
    }

    /// A cooldown-dropped snapshot on the active tab re-broadcasts the stored
    /// verdict so the UI never looks stale, without any network traffic.
    async fn rebroadcast_last_assessment(&self, tab_id: TabId) {
        if !self.tabs.is_active(tab_id) {
            return;
        }
        match self.store.last_assessment_text().await {
            Ok(Some(text)) => {
                let _ = self.ui_events.send(UiEvent::AssessmentResultText {
                    assessment_text: text,
                });
            }
            Ok(None) => {}
            Err(err) => log_warn!("could not load last assessment: {err:#}"),
        }
    }

    /// Obtains a verdict (cache, shared in-flight result, or the network) and
    /// publishes it. The URL lock, the pending-map entry, and the concurrency
    /// permit are all released on every path out of here, including panics.
    async fn classify_and_publish(
        &self,
        tab_id: TabId,
        snapshot: PageSnapshot,
        focus: &str,
        guard: InFlightGuard,
    ) {
        let _guard = guard;
        let url = snapshot.url.clone();

        if self.limit_reached.load(Ordering::SeqCst) {
            log_warn!("usage limit latched, publishing LimitReached for {url}");
            self.finalize_assessment(tab_id, &url, Assessment::LimitReached, false)
                .await;
            return;
        }

        let cached = lock(&self.caches).global_lookup(&url, focus, Instant::now());
        if let Some(cached) = cached {
            log_info!("global cache hit for {url}: {}", cached.as_str());
            lock(&self.caches).record_sticky(&url, cached, Instant::now());
            self.finalize_assessment(tab_id, &url, cached, false).await;
            return;
        }

        // An identical (url, focus) request already on the wire: await its
        // shared result instead of issuing a second call.
        let key: PendingKey = (url.clone(), focus.to_string());
        let in_flight_rx = lock(&self.pending).get(&key).cloned();
        if let Some(mut rx) = in_flight_rx {
            log_info!("awaiting in-flight classification for {url}");
            let shared = loop {
                let current = *rx.borrow();
                if current.is_some() {
                    break current;
                }
                if rx.changed().await.is_err() {
                    break *rx.borrow();
                }
            };
            if let Some(assessment) = shared {
                lock(&self.caches).record_sticky(&url, assessment, Instant::now());
                self.finalize_assessment(tab_id, &url, assessment, false).await;
            }
            return;
        }
        let (pending_tx, pending_rx) = watch::channel(None);
        lock(&self.pending).insert(key.clone(), pending_rx);
        let _pending_guard = PendingGuard {
            pending: &self.pending,
            key: key.clone(),
        };

        // FIFO admission onto the bounded network slots.
        let permit = match Arc::clone(&self.classify_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let request = ClassifyRequest {
            url: url.clone(),
            title: snapshot.title.clone(),
            meta_description: snapshot.meta_description.clone(),
            meta_keywords: snapshot.meta_keywords.clone(),
            page_text_snippet: snapshot.body_text_snippet.clone(),
            session_focus: focus.to_string(),
        };

        log_info!("classifying {url} against focus '{focus}'");
        let outcome = self.classifier.classify(&request).await;
        drop(permit);

        let assessment = match outcome {
            Ok(Verdict::Relevant) => Assessment::Relevant,
            Ok(Verdict::Irrelevant) => {
                // Sticky override: a just-confirmed Relevant absorbs a single
                // Irrelevant flicker. Never the other way around, never stale.
                if lock(&self.caches).sticky_relevant(&url, Instant::now()) {
                    log_info!("sticky override: keeping Relevant for {url}");
                    Assessment::Relevant
                } else {
                    Assessment::Irrelevant
                }
            }
            Err(ClassifyError::UsageLimit) => {
                log_warn!("classification quota exhausted, latching LimitReached");
                self.limit_reached.store(true, Ordering::SeqCst);
                Assessment::LimitReached
            }
            Err(err) => {
                log_error!("classification failed for {url}: {err}");
                Assessment::Error
            }
        };

        // Override is computed first; both caches store the final value.
        lock(&self.caches).record(&url, focus, assessment, Instant::now());

        self.finalize_assessment(tab_id, &url, assessment, true).await;

        let _ = pending_tx.send(Some(assessment));
    }

    /// Publication tail shared by every path: persist, remember, broadcast,
    /// paint the icon, and (for fresh Irrelevant verdicts only) direct the
    /// observer to show the off-focus prompt.
    async fn finalize_assessment(
        &self,
        tab_id: TabId,
        url: &str,
        assessment: Assessment,
        allow_modal: bool,
    ) {
        if assessment == Assessment::Relevant {
            *lock(&self.last_relevant_url) = Some(url.to_string());
            if let Err(err) = self.store.set_last_relevant_url(Some(url)).await {
                log_error!("failed to persist last relevant URL: {err:#}");
            }
        }
        if let Err(err) = self.store.set_last_assessment_text(assessment.as_str()).await {
            log_error!("failed to persist assessment for {url}: {err:#}");
        }
        *lock(&self.last_assessment) = Some(AssessmentRecord {
            url: url.to_string(),
            assessment,
            determined_at: Utc::now(),
        });

        let _ = self.ui_events.send(UiEvent::AssessmentResultText {
            assessment_text: assessment.as_str().to_string(),
        });

        let icon_state = match assessment {
            Assessment::Relevant => IconState::Relevant,
            Assessment::Irrelevant => IconState::Irrelevant,
            Assessment::Error => IconState::Error,
            Assessment::LimitReached => IconState::LimitReached,
        };
        let overlay = *lock(&self.cycle_mode);
        match self.tabs.set_icon(tab_id, icon_state, overlay) {
            Some(icon) => {
                let _ = self.ui_events.send(UiEvent::IconChanged { tab_id, icon });
            }
            None => log_warn!("tab {tab_id} gone before icon update"),
        }

        if allow_modal && assessment == Assessment::Irrelevant {
            let last_relevant_url = lock(&self.last_relevant_url).clone();
            self.tabs.send(
                tab_id,
                ObserverCommand::ShowOffFocusModal { last_relevant_url },
            );
        }
    }

    fn request_active_tab_update(&self, reason: &str) {
        match self.tabs.active_tab() {
            Some((tab_id, _)) => {
                self.tabs.send(
                    tab_id,
                    ObserverCommand::RequestContentUpdate {
                        source_of_request: reason.to_string(),
                    },
                );
            }
            None => log_info!("no active tab to re-check ({reason})"),
        }
    }
}

/// Removes the pending-map entry on drop so a panicking classification can
/// never leave a dead in-flight entry behind.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    key: PendingKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
