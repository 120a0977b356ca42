use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use parking_lot::RwLock;
use tracing::{info, warn};

use triage_core::context::LlmContext;
use triage_core::errors::GatewayError;
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::stream::StreamEvent;

/// Retry and circuit breaker settings for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl ReliableConfig {
    /// Build from millisecond values as they appear in settings files.
    pub fn from_millis(
        max_retries: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        circuit_breaker_threshold: u32,
        circuit_breaker_cooldown_ms: u64,
    ) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(base_delay_ms)),
            circuit_breaker_threshold: circuit_breaker_threshold.max(1),
            circuit_breaker_cooldown: Duration::from_millis(circuit_breaker_cooldown_ms),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Consecutive-failure circuit breaker:
/// closed → (threshold failures) → open → (cooldown) → half-open → closed on success.
struct CircuitBreaker {
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            threshold,
            cooldown,
        }
    }

    fn admit(&self) -> Result<(), GatewayError> {
        let since = match *self.state.read() {
            CircuitState::Closed | CircuitState::HalfOpen => return Ok(()),
            CircuitState::Open { since } => since,
        };
        if since.elapsed() >= self.cooldown {
            *self.state.write() = CircuitState::HalfOpen;
            Ok(())
        } else {
            Err(GatewayError::ProviderOverloaded)
        }
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < self.threshold {
            return;
        }
        let mut state = self.state.write();
        if !matches!(*state, CircuitState::Open { .. }) {
            warn!(
                failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    fn state_name(&self) -> &'static str {
        match *self.state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Wraps an LlmProvider with retry logic and a circuit breaker.
///
/// Only failures of the `stream()` call itself are retried. Quota and
/// authentication errors are fatal and surface immediately so the caller
/// can report them as such.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    breaker: CircuitBreaker,
    total_retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_cooldown,
        );
        Self {
            inner,
            config,
            breaker,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    /// Exponential backoff with jitter, unless the server suggested a delay.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range;
        let final_ms = (capped + jitter).max(100.0_f64.min(capped));

        Duration::from_millis(final_ms as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        self.breaker.state_name()
    }
}

/// xorshift64 seeded from the clock; jitter only.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamEvent> + Send>>, GatewayError> {
        self.breaker.admit()?;

        let mut attempt = 0;
        loop {
            let err = match self.inner.stream(context, options).await {
                Ok(stream) => {
                    self.breaker.on_success();
                    return Ok(stream);
                }
                Err(e) => e,
            };

            self.breaker.on_failure();
            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = self.retry_delay(attempt, err.suggested_delay());
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying model call"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
            self.breaker.admit()?;
        }
    }
}
