use std::time::Duration;

use anyhow::{bail, Result};

/// Timing profile for the page stabilization watch with tunable thresholds.
#[derive(Debug, Clone)]
pub struct StabilizerConfig {
    /// How often the page is re-sampled while waiting for it to settle
    pub poll_interval: Duration,

    /// How long the signature must stay unchanged before the page counts as settled
    pub min_quiet_period: Duration,

    /// Hard ceiling: a snapshot is sent at this point even if the page never settles
    pub max_wait: Duration,

    /// Delay between script startup and the first watch
    pub initial_check_delay: Duration,

    /// Coalescing window for history API bursts
    pub history_debounce: Duration,

    /// Coalescing window for DOM mutation bursts (longer, mutation churn is burstier)
    pub mutation_debounce: Duration,

    /// Minimum time between two transmitted snapshots for the same URL
    pub send_cooldown: Duration,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            min_quiet_period: Duration::from_millis(1200),
            max_wait: Duration::from_millis(3000),
            initial_check_delay: Duration::from_millis(300),
            history_debounce: Duration::from_millis(700),
            mutation_debounce: Duration::from_millis(2000),
            send_cooldown: Duration::from_millis(7000),
        }
    }
}

impl StabilizerConfig {
    /// A watch can only terminate correctly when the quiet period fits inside the
    /// max-wait window and at least one poll happens per quiet period.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be non-zero");
        }
        if self.min_quiet_period > self.max_wait {
            bail!(
                "min_quiet_period ({:?}) must not exceed max_wait ({:?})",
                self.min_quiet_period,
                self.max_wait
            );
        }
        if self.poll_interval >= self.min_quiet_period {
            bail!(
                "poll_interval ({:?}) must be shorter than min_quiet_period ({:?})",
                self.poll_interval,
                self.min_quiet_period
            );
        }
        Ok(())
    }
}

/// Gating and caching parameters for the session coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Minimum time between two classification attempts for the same URL
    pub process_cooldown: Duration,

    /// How long a fresh "Relevant" verdict suppresses a single "Irrelevant" flicker
    pub sticky_relevant_ttl: Duration,

    /// Lifetime of cross-session (url, focus) cache entries
    pub global_cache_ttl: Duration,

    /// Garbage collection kicks in once the global cache grows past this
    pub global_cache_max_entries: usize,

    /// Simultaneous classification calls allowed on the network
    pub max_concurrent_classifications: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            process_cooldown: Duration::from_millis(3000),
            sticky_relevant_ttl: Duration::from_millis(7000),
            global_cache_ttl: Duration::from_secs(600),
            global_cache_max_entries: 512,
            max_concurrent_classifications: 3,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_classifications == 0 {
            bail!("max_concurrent_classifications must be at least 1");
        }
        if self.global_cache_max_entries == 0 {
            bail!("global_cache_max_entries must be at least 1");
        }
        Ok(())
    }
}
