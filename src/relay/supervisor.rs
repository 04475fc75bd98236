use crate::{
    config::SupervisorConfig,
    transport::{BusConsumer, EventHandler},
    Result,
};
use rand::Rng;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Exponential backoff with an upper bound and optional jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    /// Creates an instance of [`Backoff`] starting at `base`, capped at `max`
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
            attempt: 0,
        }
    }

    /// Turns jitter on or off
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt; doubles on every call until the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(1 << self.attempt.min(15))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let spread = (delay.as_millis() / 2).max(1) as u64;
        let extra = Duration::from_millis(rand::rng().random_range(0..=spread));

        (delay + extra).min(self.max)
    }

    /// Starts over from `base`
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Keeps a consumer's receive cycle running.
///
/// A cycle that ends cleanly is restarted after a backoff. Cycles that end
/// before `healthy_after` count as failures; `breaker_threshold` of them in a
/// row open the breaker for `breaker_cooldown` before restarting again. A
/// cycle that returns an error stops the supervisor.
#[derive(Debug)]
pub struct Supervisor {
    backoff: Backoff,
    breaker_threshold: u32,
    breaker_cooldown: Duration,
    healthy_after: Duration,
    failures: u32,
}

impl Supervisor {
    /// Creates an instance of [`Supervisor`]
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            backoff: Backoff::new(config.backoff_base(), config.max_backoff()),
            breaker_threshold: config.breaker_threshold.max(1),
            breaker_cooldown: config.breaker_cooldown(),
            healthy_after: config.healthy_after(),
            failures: 0,
        }
    }

    /// Replaces the restart backoff
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs receive cycles until one fails
    pub async fn run(
        &mut self,
        consumer: &mut dyn BusConsumer,
        handler: &dyn EventHandler,
    ) -> Result<()> {
        loop {
            let started = Instant::now();

            consumer.start_receiver(handler).await?;

            if started.elapsed() >= self.healthy_after {
                self.failures = 0;
                self.backoff.reset();
            } else {
                self.failures += 1;
            }

            if self.failures >= self.breaker_threshold {
                tracing::error!(
                    failures = self.failures,
                    cooldown_ms = self.breaker_cooldown.as_millis() as u64,
                    "Receive cycle keeps ending; opening circuit breaker"
                );
                time::sleep(self.breaker_cooldown).await;
                self.failures = 0;
                self.backoff.reset();
                continue;
            }

            let delay = self.backoff.next_delay();
            tracing::warn!(
                failures = self.failures,
                delay_ms = delay.as_millis() as u64,
                "Receive cycle ended; restarting"
            );
            time::sleep(delay).await;
        }
    }
}
