use chrono::Utc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StabilizerConfig;
use crate::messages::SettleReason;
use crate::models::PageSnapshot;

use super::probe::PageProbe;
use super::signature::{build_snapshot, page_signature};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub(crate) struct WatchOutcome {
    pub snapshot: PageSnapshot,
    pub reason: SettleReason,
}

/// Runs one stabilization attempt: samples the page signature on the poll
/// interval and settles once the signature has been quiet long enough after
/// an observed change. The max-wait deadline is authoritative and fires a
/// send regardless; cancellation (a superseding watch) yields None.
///
/// A page that never changes across the whole window cannot be told apart
/// from one whose load has not started, so the quiet-period exit requires at
/// least one observed signature change; otherwise the deadline sends.
pub(crate) async fn run_watch(
    watch_id: &str,
    probe: &dyn PageProbe,
    config: &StabilizerConfig,
    cancel: &CancellationToken,
) -> Option<WatchOutcome> {
    let started = Instant::now();
    let deadline = started + config.max_wait;

    let mut ticker = time::interval_at(started + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let max_wait = time::sleep_until(deadline);
    tokio::pin!(max_wait);

    let mut last_signature: Option<String> = None;
    let mut last_signature_at = started;
    let mut change_count: u32 = 0;

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log_info!("watch {watch_id}: superseded, dropping without send");
                return None;
            }
            _ = &mut max_wait => {
                log_info!(
                    "watch {watch_id}: max wait ({:?}) reached after {} changes, sending current data",
                    config.max_wait,
                    change_count
                );
                break SettleReason::MaxWaitTimeout;
            }
            _ = ticker.tick() => {
                let view = match probe.current_view().await {
                    Ok(view) => view,
                    Err(err) => {
                        log_warn!("watch {watch_id}: page read failed, retrying next tick: {err:#}");
                        continue;
                    }
                };
                let signature = page_signature(&view);
                let now = Instant::now();

                match last_signature.as_deref() {
                    None => {
                        last_signature = Some(signature);
                        last_signature_at = now;
                    }
                    Some(previous) if previous != signature => {
                        last_signature = Some(signature);
                        last_signature_at = now;
                        change_count += 1;
                    }
                    Some(_) => {
                        let quiet_for = now.saturating_duration_since(last_signature_at);
                        if change_count > 0 && quiet_for >= config.min_quiet_period {
                            log_info!(
                                "watch {watch_id}: signature quiet for {quiet_for:?}, sending"
                            );
                            break SettleReason::Stabilized;
                        }
                    }
                }
            }
        }
    };

    // Superseded while the final tick was in flight: stale tokens never send.
    if cancel.is_cancelled() {
        log_info!("watch {watch_id}: cancelled at settle, dropping");
        return None;
    }

    // Extract the full payload at send time so the snapshot reflects the
    // final page, not the last sampled prefix.
    let view = match probe.current_view().await {
        Ok(view) => view,
        Err(err) => {
            log_error!("watch {watch_id}: final extraction failed: {err:#}");
            return None;
        }
    };

    Some(WatchOutcome {
        snapshot: build_snapshot(&view, Utc::now()),
        reason,
    })
}
