//! 🔁 Retry policy: how long to wait before knocking on the cluster's door again.
//!
//! 🧠 Knowledge graph:
//! - Delay before retry `n` (0-based) is `min_delay * factor^n`, capped at `max_delay`.
//! - `factor = 1.0` (the default) means a constant delay. The ceiling is still
//!   there, it just never gets reached. Like my step goal.
//! - `max_attempts = None` means forever. `Some(k)` means at most `k` attempts total.
//! - The loop itself is `tokio_retry::Retry`, fed by the delay iterator built here.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio_retry::Retry;

/// 🔧 Knobs for the health-check retry loop.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryPolicy {
    /// ⏱️ First (and with factor 1.0, every) delay between attempts.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// 🧱 The ceiling. No delay ever exceeds this.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 📈 Growth per retry. 1.0 = flat line.
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// 🔢 Total attempts allowed. `None` = keep trying until the heat death of the universe.
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

fn default_min_delay_ms() -> u64 {
    1000
}

// 🧱 one minute. if the cluster needs longer than that between pokes, it needs a vacation.
fn default_max_delay_ms() -> u64 {
    60 * 1000
}

fn default_factor() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// 🎯 Constant delay, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min_delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// 📏 The delay slept before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.max_delay_ms as f64;
        let exponent = retry.min(i32::MAX as u32) as i32;
        let grown = self.min_delay_ms as f64 * self.factor.max(1.0).powi(exponent);
        Duration::from_millis(grown.min(ceiling) as u64)
    }

    /// 🔄 The sequence of delays between attempts. Finite only when `max_attempts` is set.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let policy = self.clone();
        let unbounded = std::iter::successors(Some(0u32), |retry| Some(retry.saturating_add(1)))
            .map(move |retry| policy.delay_for(retry));
        match self.max_attempts {
            // ⚠️ k attempts means k-1 sleeps in between. zero attempts is silly; we still try once.
            Some(max_attempts) => Box::new(unbounded.take(max_attempts.saturating_sub(1))),
            None => Box::new(unbounded),
        }
    }

    /// 🚀 Run `action` until it succeeds or the delays run out.
    ///
    /// The action receives its 1-based attempt number, mostly so it can log it.
    /// On exhaustion the error of the final attempt comes back along with the
    /// number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, mut action: F) -> Result<T, (usize, E)>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts = 0usize;
        let outcome = Retry::spawn(self.delays(), || {
            attempts += 1;
            action(attempts)
        })
        .await;
        outcome.map_err(|err| (attempts, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn the_one_where_the_default_policy_is_a_flat_line_forever() {
        let policy = RetryPolicy::default();
        let first_ten: Vec<Duration> = policy.delays().take(10).collect();
        assert!(
            first_ten.iter().all(|d| *d == Duration::from_secs(1)),
            "factor 1.0 means every delay is the same boring second"
        );
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn the_one_where_growth_hits_the_ceiling_and_stays_there() {
        let policy = RetryPolicy {
            min_delay_ms: 100,
            max_delay_ms: 1000,
            factor: 2.0,
            max_attempts: None,
        };
        let delays: Vec<u128> = policy.delays().take(6).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn the_one_where_max_attempts_means_one_less_nap() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10)).with_max_attempts(3);
        assert_eq!(policy.delays().count(), 2);
    }

    #[test]
    fn the_one_where_an_absurd_delay_saturates_instead_of_wrapping() {
        let policy = RetryPolicy::fixed(Duration::MAX);
        assert_eq!(policy.min_delay_ms, u64::MAX);

        let policy = RetryPolicy::fixed(Duration::from_millis(1500));
        assert_eq!(policy.min_delay_ms, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_run_keeps_knocking_until_someone_answers() {
        let knocks = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::fixed(Duration::from_millis(500));
        let started = tokio::time::Instant::now();

        let answered = policy
            .run(|attempt| {
                let knocks = knocks.clone();
                async move {
                    knocks.fetch_add(1, Ordering::SeqCst);
                    if attempt < 4 { Err("nobody home") } else { Ok(attempt) }
                }
            })
            .await;

        assert_eq!(answered, Ok(4));
        assert_eq!(knocks.load(Ordering::SeqCst), 4);
        // ⏱️ three naps of 500ms between four knocks
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1500), "waited only {waited:?}");
        assert!(waited < Duration::from_millis(1600), "waited way too long: {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_finite_policy_gives_up_and_says_how_hard_it_tried() {
        let policy = RetryPolicy::fixed(Duration::from_millis(500)).with_max_attempts(3);

        let outcome: Result<(), (usize, &str)> = policy.run(|_| async { Err("still nobody") }).await;

        assert_eq!(outcome, Err((3, "still nobody")));
    }
}
