use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::rate_limit::token_bucket::TokenBucket;
use crate::config::settings::RateLimiter as RateLimiterSettings;
use crate::utils::error::RateLimitError;

const HISTORY_LEN: usize = 100;
const ADAPT_MIN_SAMPLES: usize = 10;
const ADAPT_WINDOW: usize = 20;
const SPEEDUP_DIVISOR: f64 = 1.2;

/// Configuration for the adaptive rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Floor for every domain's delay
    pub min_delay: Duration,
    /// Ceiling for every domain's delay
    pub max_delay: Duration,
    /// Delay a newly seen domain starts with
    pub initial_delay: Duration,
    /// Factor applied to the delay on each rate-limited response
    pub backoff_multiplier: f64,
    /// Upper bound for multiplicative backoff
    pub max_backoff_delay: Duration,
    /// Concurrent requests per domain, also the domain bucket's capacity
    pub max_concurrent_per_domain: usize,
    /// One domain token is regained per interval
    pub refill_interval: Duration,
    /// New domains that may be admitted in a burst
    pub global_domain_burst: usize,
    /// One new-domain admission is regained per interval
    pub global_refill_interval: Duration,
    /// Longest a single `wait` may block
    pub wait_timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::from(&RateLimiterSettings::default())
    }
}

impl From<&RateLimiterSettings> for RateLimiterConfig {
    fn from(settings: &RateLimiterSettings) -> Self {
        Self {
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_backoff_delay: Duration::from_millis(settings.max_backoff_delay_ms),
            max_concurrent_per_domain: settings.max_concurrent_per_domain,
            refill_interval: Duration::from_millis(settings.refill_interval_ms),
            global_domain_burst: settings.global_domain_burst,
            global_refill_interval: Duration::from_millis(settings.global_refill_interval_ms),
            wait_timeout: Duration::from_secs(settings.wait_timeout_secs),
        }
    }
}

impl RateLimiterConfig {
    fn sanitized(mut self) -> Self {
        self.max_delay = self.max_delay.max(self.min_delay);
        self.initial_delay = self.initial_delay.clamp(self.min_delay, self.max_delay);
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            warn!("Invalid backoff multiplier {}, using 2.0", self.backoff_multiplier);
            self.backoff_multiplier = 2.0;
        }
        self.max_concurrent_per_domain = self.max_concurrent_per_domain.max(1);
        self.global_domain_burst = self.global_domain_burst.max(1);
        self
    }
}

/// What happened to one request, fed back through `record_request`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub rate_limited: bool,
    pub response_time: Duration,
}

impl RequestOutcome {
    pub fn success(status_code: Option<u16>, response_time: Duration) -> Self {
        Self {
            success: true,
            status_code,
            rate_limited: false,
            response_time,
        }
    }

    pub fn failure(status_code: Option<u16>, response_time: Duration) -> Self {
        Self {
            success: false,
            status_code,
            rate_limited: false,
            response_time,
        }
    }

    pub fn rate_limited(response_time: Duration) -> Self {
        Self {
            success: false,
            status_code: Some(429),
            rate_limited: true,
            response_time,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited || self.status_code == Some(429)
    }
}

#[derive(Debug)]
struct DomainThrottleState {
    current_delay: Duration,
    last_request_time: Option<Instant>,
    last_activity: Instant,
    request_count: u64,
    success_count: u64,
    error_count: u64,
    rate_limited_count: u64,
    token_bucket: TokenBucket,
    recent_history: VecDeque<RequestOutcome>,
}

impl DomainThrottleState {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            last_request_time: None,
            last_activity: Instant::now(),
            request_count: 0,
            success_count: 0,
            error_count: 0,
            rate_limited_count: 0,
            token_bucket: TokenBucket::new(config.max_concurrent_per_domain as u32, config.refill_interval),
            recent_history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    fn apply(&mut self, outcome: RequestOutcome, config: &RateLimiterConfig) {
        self.last_activity = Instant::now();
        if self.recent_history.len() == HISTORY_LEN {
            self.recent_history.pop_front();
        }
        self.recent_history.push_back(outcome);

        if outcome.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }

        if outcome.is_rate_limited() {
            self.rate_limited_count += 1;
            let backed_off = (self.current_delay.as_secs_f64() * config.backoff_multiplier)
                .min(config.max_backoff_delay.as_secs_f64());
            self.current_delay = self.current_delay.max(Duration::from_secs_f64(backed_off));
        } else if self.recent_history.len() >= ADAPT_MIN_SAMPLES {
            let window = self.recent_history.iter().rev().take(ADAPT_WINDOW);
            let (samples, successes, limited) = window.fold((0usize, 0usize, 0usize), |(n, ok, rl), o| {
                (n + 1, ok + usize::from(o.success), rl + usize::from(o.is_rate_limited()))
            });
            let success_rate = successes as f64 / samples as f64;
            let limited_rate = limited as f64 / samples as f64;
            if success_rate > 0.9 && limited_rate < 0.1 {
                self.current_delay = self.current_delay.div_f64(SPEEDUP_DIVISOR).max(config.min_delay);
            }
        }

        self.current_delay = self.current_delay.clamp(config.min_delay, config.max_delay);
    }

    fn recent_success_rate(&self) -> f64 {
        if self.recent_history.is_empty() {
            return 1.0;
        }
        let ok = self.recent_history.iter().filter(|o| o.success).count();
        ok as f64 / self.recent_history.len() as f64
    }
}

struct DomainEntry {
    state: Mutex<DomainThrottleState>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl DomainEntry {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            state: Mutex::new(DomainThrottleState::new(config)),
            slots: Arc::new(Semaphore::new(config.max_concurrent_per_domain)),
            capacity: config.max_concurrent_per_domain,
        }
    }

    fn slots_in_use(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }
}

/// Copy of one domain's throttle state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainThrottleSnapshot {
    pub domain: String,
    pub current_delay: Duration,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub rate_limited_count: u64,
    pub available_tokens: u32,
    pub slots_in_use: usize,
    pub recent_success_rate: f64,
}

/// Holds one of the domain's concurrent-request slots until dropped.
#[derive(Debug)]
pub struct DomainPermit {
    domain: String,
    _slot: OwnedSemaphorePermit,
}

impl DomainPermit {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// Per-domain token buckets with delays that tune themselves from feedback,
/// behind a global cap on how fast new domains are admitted.
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    domains: RwLock<HashMap<String, Arc<DomainEntry>>>,
    global_bucket: Mutex<TokenBucket>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let config = config.sanitized();
        let global_bucket = TokenBucket::new(config.global_domain_burst as u32, config.global_refill_interval);
        Self {
            config,
            domains: RwLock::new(HashMap::new()),
            global_bucket: Mutex::new(global_bucket),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Block until a request to `domain` may go out.
    ///
    /// Takes a concurrency slot, sleeps out the remainder of
    /// `max(current_delay, required_delay, min_delay)` since the previous
    /// request, then takes a token from the domain's bucket. The returned
    /// permit keeps the slot until it is dropped.
    pub async fn wait(
        &self,
        domain: &str,
        required_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<DomainPermit, RateLimitError> {
        let deadline = instant_after(self.config.wait_timeout);
        let entry = self.admit(domain, cancel, deadline).await?;

        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RateLimitError::Cancelled { domain: domain.to_string() }),
            _ = sleep_until(deadline) => return Err(self.timeout_error(domain)),
            slot = entry.slots.clone().acquire_owned() => slot.map_err(|_| RateLimitError::Cancelled {
                domain: domain.to_string(),
            })?,
        };

        let remaining = {
            let state = entry.state.lock().await;
            let effective = state
                .current_delay
                .max(required_delay)
                .max(self.config.min_delay);
            state
                .last_request_time
                .map(|last| effective.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !remaining.is_zero() {
            debug!("Rate limiting: sleeping for {}ms before requesting {}", remaining.as_millis(), domain);
            self.pause(domain, remaining, cancel, deadline).await?;
        }

        if !self.take_token(&entry).await {
            // One refill interval of grace before giving up
            self.pause(domain, self.config.refill_interval, cancel, deadline).await?;
            if !self.take_token(&entry).await {
                warn!("Request budget exhausted for {}", domain);
                return Err(RateLimitError::DomainLimitExceeded {
                    domain: domain.to_string(),
                });
            }
        }

        Ok(DomainPermit {
            domain: domain.to_string(),
            _slot: slot,
        })
    }

    /// Feed an observed outcome back into the domain's delay.
    pub async fn record_request(&self, domain: &str, outcome: RequestOutcome) {
        let entry = self.entry(domain).await;
        let mut state = entry.state.lock().await;
        let before = state.current_delay;
        state.apply(outcome, &self.config);
        if state.current_delay != before {
            debug!(
                domain = %domain,
                from_ms = before.as_millis() as u64,
                to_ms = state.current_delay.as_millis() as u64,
                "Adjusted crawl delay"
            );
        }
    }

    pub async fn current_delay(&self, domain: &str) -> Option<Duration> {
        let entry = self.domains.read().await.get(domain).cloned()?;
        let delay = entry.state.lock().await.current_delay;
        Some(delay)
    }

    pub async fn domain_snapshot(&self, domain: &str) -> Option<DomainThrottleSnapshot> {
        let entry = self.domains.read().await.get(domain).cloned()?;
        Some(Self::snapshot(domain, &entry).await)
    }

    pub async fn snapshots(&self) -> Vec<DomainThrottleSnapshot> {
        let entries: Vec<(String, Arc<DomainEntry>)> = self
            .domains
            .read()
            .await
            .iter()
            .map(|(domain, entry)| (domain.clone(), entry.clone()))
            .collect();

        let mut snapshots = Vec::with_capacity(entries.len());
        for (domain, entry) in entries {
            snapshots.push(Self::snapshot(&domain, &entry).await);
        }
        snapshots
    }

    pub async fn tracked_domains(&self) -> usize {
        self.domains.read().await.len()
    }

    /// Forget domains idle for longer than `ttl` with no request in flight.
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        let mut domains = self.domains.write().await;
        let before = domains.len();
        domains.retain(|_, entry| {
            // Another holder is a waiter between admission and its slot
            if entry.slots_in_use() > 0 || Arc::strong_count(entry) > 1 {
                return true;
            }
            // A held lock means someone is using the domain right now
            match entry.state.try_lock() {
                Ok(state) => state.last_activity.elapsed() <= ttl,
                Err(_) => true,
            }
        });
        let pruned = before - domains.len();
        if pruned > 0 {
            info!("Pruned {} idle domains from the rate limiter", pruned);
        }
        pruned
    }

    async fn snapshot(domain: &str, entry: &DomainEntry) -> DomainThrottleSnapshot {
        let mut state = entry.state.lock().await;
        let available_tokens = state.token_bucket.available_at(Instant::now());
        DomainThrottleSnapshot {
            domain: domain.to_string(),
            current_delay: state.current_delay,
            request_count: state.request_count,
            success_count: state.success_count,
            error_count: state.error_count,
            rate_limited_count: state.rate_limited_count,
            available_tokens,
            slots_in_use: entry.slots_in_use(),
            recent_success_rate: state.recent_success_rate(),
        }
    }

    /// Existing entry, or a new one once the global bucket admits the domain.
    async fn admit(
        &self,
        domain: &str,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Arc<DomainEntry>, RateLimitError> {
        loop {
            if let Some(entry) = self.domains.read().await.get(domain) {
                return Ok(entry.clone());
            }

            let wait_for = {
                let mut global = self.global_bucket.lock().await;
                let now = Instant::now();
                if global.try_acquire_at(now) {
                    None
                } else {
                    Some(global.time_until_next_token(now).max(Duration::from_millis(1)))
                }
            };

            match wait_for {
                None => return Ok(self.entry(domain).await),
                Some(delay) => {
                    debug!("Global admission cap reached, {} waits {}ms", domain, delay.as_millis());
                    self.pause(domain, delay, cancel, deadline).await?;
                }
            }
        }
    }

    async fn entry(&self, domain: &str) -> Arc<DomainEntry> {
        if let Some(entry) = self.domains.read().await.get(domain) {
            return entry.clone();
        }
        let mut domains = self.domains.write().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainEntry::new(&self.config)))
            .clone()
    }

    async fn take_token(&self, entry: &DomainEntry) -> bool {
        let mut state = entry.state.lock().await;
        let now = Instant::now();
        if !state.token_bucket.try_acquire_at(now) {
            return false;
        }
        state.last_request_time = Some(now);
        state.last_activity = now;
        state.request_count += 1;
        true
    }

    async fn pause(
        &self,
        domain: &str,
        duration: Duration,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), RateLimitError> {
        // A wake time past the representable range is past the deadline too
        let wake = Instant::now().checked_add(duration);
        let past_deadline = wake.map_or(true, |wake| wake > deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled { domain: domain.to_string() }),
            _ = sleep_until(wake.map_or(deadline, |wake| wake.min(deadline))) => {
                if past_deadline {
                    Err(self.timeout_error(domain))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn timeout_error(&self, domain: &str) -> RateLimitError {
        RateLimitError::Timeout {
            domain: domain.to_string(),
            waited: self.config.wait_timeout,
        }
    }
}

/// `now + duration`, saturating at a far-future instant instead of overflowing.
fn instant_after(duration: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);
    let now = Instant::now();
    now.checked_add(duration)
        .unwrap_or_else(|| now + FAR_FUTURE)
}
