use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::StabilizerConfig;
use crate::messages::{ObserverCommand, PageEvent, TabId, TriggerSource};

use super::debounce::Debouncer;
use super::probe::{MutationBatch, PageProbe};
use super::prompt::PromptController;
use super::stabilizer::run_watch;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// One tab's page observer: owns the single live stabilization watch, the
/// per-URL send cooldown, the trigger debouncers, and the off-focus prompt.
///
/// Starting a new watch cancels the previous one through its token, so a
/// superseded attempt can never fire a stale snapshot.
pub struct PageObserver {
    tab_id: TabId,
    probe: Arc<dyn PageProbe>,
    events: mpsc::UnboundedSender<PageEvent>,
    config: StabilizerConfig,
    active_watch: Mutex<Option<CancellationToken>>,
    last_sent: Mutex<HashMap<String, Instant>>,
    history_debounce: Debouncer,
    mutation_debounce: Debouncer,
    prompt: PromptController,
}

impl PageObserver {
    pub fn new(
        tab_id: TabId,
        probe: Arc<dyn PageProbe>,
        events: mpsc::UnboundedSender<PageEvent>,
        config: StabilizerConfig,
    ) -> Result<Arc<Self>> {
        config.validate().context("invalid stabilizer config")?;

        Ok(Arc::new(Self {
            tab_id,
            probe,
            events: events.clone(),
            history_debounce: Debouncer::new(config.history_debounce),
            mutation_debounce: Debouncer::new(config.mutation_debounce),
            config,
            active_watch: Mutex::new(None),
            last_sent: Mutex::new(HashMap::new()),
            prompt: PromptController::new(events),
        }))
    }

    pub fn prompt(&self) -> &PromptController {
        &self.prompt
    }

    /// Kicks off the initial-load watch after the configured settle delay.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.config.initial_check_delay).await;
            this.initiate_watch(TriggerSource::InitialLoad).await;
        })
    }

    /// Begins a stabilization attempt, superseding any watch in progress.
    /// Skipped entirely when a snapshot for the current URL went out within
    /// the send cooldown, no matter what triggered it.
    pub async fn initiate_watch(self: &Arc<Self>, source: TriggerSource) {
        let url = match self.probe.current_url().await {
            Ok(url) => url,
            Err(err) => {
                log_warn!("tab {}: could not read current URL: {err:#}", self.tab_id);
                return;
            }
        };

        if let Some(sent_at) = self.lock_last_sent().get(&url) {
            if sent_at.elapsed() < self.config.send_cooldown {
                log_info!(
                    "tab {}: {url} in send cooldown, skipping stabilization ({})",
                    self.tab_id,
                    source.as_str()
                );
                return;
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        {
            let mut active = self.lock_active_watch();
            if let Some(previous) = active.replace(token.clone()) {
                previous.cancel();
                log_info!("tab {}: cancelled previous stabilization watch", self.tab_id);
            }
        }
        log_info!(
            "tab {}: watch {request_id} started ({})",
            self.tab_id,
            source.as_str()
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Some(outcome) = run_watch(&request_id, this.probe.as_ref(), &this.config, &token).await
            else {
                return;
            };
            // The watch may have been superseded between settling and now.
            if token.is_cancelled() {
                log_info!("tab {}: watch {request_id} superseded at send", this.tab_id);
                return;
            }

            this.lock_last_sent()
                .insert(outcome.snapshot.url.clone(), Instant::now());

            let event = PageEvent::ContentUpdated {
                tab_id: this.tab_id,
                triggering_source: format!("{}_{}", source.as_str(), outcome.reason.as_str()),
                request_id,
                data: outcome.snapshot,
            };
            if this.events.send(event).is_err() {
                log_warn!("tab {}: coordinator channel closed, snapshot dropped", this.tab_id);
            }
        });
    }

    /// History API bursts coalesce in a short window before watching.
    pub fn notify_history_change(self: &Arc<Self>, source: TriggerSource) {
        let this = Arc::clone(self);
        self.history_debounce.trigger(move || async move {
            this.initiate_watch(source).await;
        });
    }

    /// Mutation bursts get a longer window; insignificant batches are ignored
    /// without touching the debouncer.
    pub fn notify_mutation(self: &Arc<Self>, batch: MutationBatch) {
        if !batch.is_significant() {
            return;
        }
        let this = Arc::clone(self);
        self.mutation_debounce.trigger(move || async move {
            this.initiate_watch(TriggerSource::MutationEvent).await;
        });
    }

    pub async fn handle_command(self: &Arc<Self>, command: ObserverCommand) {
        match command {
            ObserverCommand::RequestContentUpdate { source_of_request } => {
                log_info!(
                    "tab {}: content update requested by {source_of_request}",
                    self.tab_id
                );
                self.initiate_watch(TriggerSource::BackgroundRequest).await;
            }
            ObserverCommand::ShowOffFocusModal { last_relevant_url } => {
                self.prompt.show(last_relevant_url);
            }
        }
    }

    /// Drains coordinator commands until the channel closes or shutdown.
    pub fn spawn_command_loop(
        self: &Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<ObserverCommand>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = commands.recv() => {
                        match command {
                            Some(command) => this.handle_command(command).await,
                            None => break,
                        }
                    }
                    _ = cancel.cancelled() => {
                        log_info!("tab {}: command loop shutting down", this.tab_id);
                        break;
                    }
                }
            }
            this.cancel_active_watch();
        })
    }

    pub fn cancel_active_watch(&self) {
        if let Some(token) = self.lock_active_watch().take() {
            token.cancel();
        }
        self.history_debounce.cancel();
        self.mutation_debounce.cancel();
    }

    fn lock_active_watch(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        match self.active_watch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_last_sent(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        match self.last_sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageView;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Probe backed by a mutable view; tests swap the body to simulate
    /// navigation and content churn.
    struct FixtureProbe {
        view: Mutex<PageView>,
    }

    impl FixtureProbe {
        fn new(url: &str, body: &str) -> Arc<Self> {
            Arc::new(Self {
                view: Mutex::new(PageView {
                    url: url.into(),
                    title: "Fixture".into(),
                    body_text: Some(body.into()),
                    ..PageView::default()
                }),
            })
        }

        fn set_body(&self, body: &str) {
            self.view.lock().unwrap().body_text = Some(body.into());
        }

        fn set_url(&self, url: &str) {
            self.view.lock().unwrap().url = url.into();
        }
    }

    #[async_trait]
    impl PageProbe for FixtureProbe {
        async fn current_url(&self) -> Result<String> {
            Ok(self.view.lock().unwrap().url.clone())
        }

        async fn current_view(&self) -> Result<PageView> {
            Ok(self.view.lock().unwrap().clone())
        }
    }

    fn fast_config() -> StabilizerConfig {
        StabilizerConfig {
            poll_interval: Duration::from_millis(50),
            min_quiet_period: Duration::from_millis(200),
            max_wait: Duration::from_millis(500),
            initial_check_delay: Duration::from_millis(10),
            history_debounce: Duration::from_millis(100),
            mutation_debounce: Duration::from_millis(300),
            send_cooldown: Duration::from_millis(2000),
        }
    }

    fn observer_fixture(
        probe: Arc<FixtureProbe>,
    ) -> (Arc<PageObserver>, mpsc::UnboundedReceiver<PageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = PageObserver::new(7, probe, tx, fast_config()).unwrap();
        (observer, rx)
    }

    async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<PageEvent>) -> Option<PageEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_triggers_send_only_the_latest_watch() {
        let probe = FixtureProbe::new("https://spa.example/feed", "first view");
        let (observer, mut rx) = observer_fixture(Arc::clone(&probe));

        observer.initiate_watch(TriggerSource::InitialLoad).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // A second trigger supersedes the first before it can settle.
        probe.set_body("second view content");
        observer
            .initiate_watch(TriggerSource::BackgroundRequest)
            .await;

        let event = next_snapshot(&mut rx).await.expect("one snapshot");
        match event {
            PageEvent::ContentUpdated {
                data,
                triggering_source,
                ..
            } => {
                assert!(triggering_source.starts_with("background_request"));
                assert_eq!(data.body_text_snippet, "second view content");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The superseded watch must not produce a second send.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn send_cooldown_suppresses_back_to_back_snapshots() {
        let probe = FixtureProbe::new("https://example.com/doc", "steady content");
        let (observer, mut rx) = observer_fixture(Arc::clone(&probe));

        observer.initiate_watch(TriggerSource::InitialLoad).await;
        assert!(next_snapshot(&mut rx).await.is_some());

        // Inside the cooldown window nothing new goes out, even after a
        // successful stabilization trigger.
        observer
            .initiate_watch(TriggerSource::BackgroundRequest)
            .await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());

        // After the window the same URL may be re-sent.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        observer
            .initiate_watch(TriggerSource::BackgroundRequest)
            .await;
        assert!(next_snapshot(&mut rx).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_is_per_url() {
        let probe = FixtureProbe::new("https://example.com/a", "page a");
        let (observer, mut rx) = observer_fixture(Arc::clone(&probe));

        observer.initiate_watch(TriggerSource::InitialLoad).await;
        assert!(next_snapshot(&mut rx).await.is_some());

        probe.set_url("https://example.com/b");
        probe.set_body("page b");
        observer
            .notify_history_change(TriggerSource::HistoryPushState);

        let event = next_snapshot(&mut rx).await.expect("snapshot for /b");
        match event {
            PageEvent::ContentUpdated { data, .. } => {
                assert_eq!(data.url, "https://example.com/b");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn history_bursts_coalesce_into_one_watch() {
        let probe = FixtureProbe::new("https://spa.example/inbox", "inbox");
        let (observer, mut rx) = observer_fixture(Arc::clone(&probe));

        for _ in 0..4 {
            observer.notify_history_change(TriggerSource::HistoryPushState);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert!(next_snapshot(&mut rx).await.is_some());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn insignificant_mutations_never_start_a_watch() {
        let probe = FixtureProbe::new("https://example.com", "content");
        let (observer, mut rx) = observer_fixture(probe);

        observer.notify_mutation(MutationBatch::default());
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(rx.try_recv().is_err());

        observer.notify_mutation(MutationBatch {
            title_changed: true,
            content_nodes_changed: false,
        });
        assert!(next_snapshot(&mut rx).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn command_loop_shows_the_off_focus_prompt() {
        let probe = FixtureProbe::new("https://example.com", "content");
        let (observer, _rx) = observer_fixture(probe);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let loop_handle = observer.spawn_command_loop(cmd_rx, cancel.clone());

        cmd_tx
            .send(ObserverCommand::ShowOffFocusModal {
                last_relevant_url: Some("https://work.example".into()),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let prompt = observer.prompt().current().expect("prompt visible");
        assert_eq!(prompt.last_relevant_url.as_deref(), Some("https://work.example"));

        cancel.cancel();
        loop_handle.await.unwrap();
    }
}
