//! Exponential backoff with jitter, shared by the email worker (base 60s,
//! §4.2 step 7) and the webhook worker (base 30s, §4.6). `attempt` is the
//! zero-indexed number of prior attempts, so the first retry uses
//! `attempt = 0`.

use rand::Rng;
use time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_seconds: u64,
    max_retries: i32,
}

impl RetryPolicy {
    pub fn new(base_seconds: u64, max_retries: i32) -> Self {
        Self {
            base_seconds,
            max_retries,
        }
    }

    /// Email retry policy per §4.2: base 60s, default 3 retries.
    pub fn email_default() -> Self {
        Self::new(60, 3)
    }

    /// Webhook retry policy per §4.6: base 30s, 3 retries.
    pub fn webhook_default() -> Self {
        Self::new(30, 3)
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// `base_seconds * 2^attempt`, plus up to 20% jitter, as a [`Duration`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_seconds.saturating_mul(2u64.saturating_pow(attempt));
        let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..0.2);
        let jittered = base as f64 * (1.0 + jitter_fraction);
        Duration::seconds_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::new(60, 3);
        // Jitter only ever adds up to 20%, so bounds still separate cleanly.
        assert!(policy.backoff(0).whole_seconds() >= 60);
        assert!(policy.backoff(0).whole_seconds() < 72);
        assert!(policy.backoff(1).whole_seconds() >= 120);
        assert!(policy.backoff(1).whole_seconds() < 144);
        assert!(policy.backoff(2).whole_seconds() >= 240);
    }

    #[test]
    fn email_default_matches_spec() {
        let policy = RetryPolicy::email_default();
        assert_eq!(policy.max_retries(), 3);
        assert!(policy.backoff(0).whole_seconds() >= 60);
    }

    #[test]
    fn webhook_default_matches_spec() {
        let policy = RetryPolicy::webhook_default();
        assert_eq!(policy.max_retries(), 3);
        assert!(policy.backoff(0).whole_seconds() >= 30);
    }
}
