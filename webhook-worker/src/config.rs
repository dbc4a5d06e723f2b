use envconfig::Envconfig;
use mailer_common::config::CoreSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Settings {
    #[envconfig(nested = true)]
    pub core: CoreSettings,

    #[envconfig(from = "WEBHOOK_WORKER_POLL_INTERVAL_MS", default = "500")]
    pub poll_interval_ms: u64,

    #[envconfig(from = "WEBHOOK_WORKER_VISIBILITY_TIMEOUT_SECS", default = "60")]
    pub visibility_timeout_secs: i64,

    #[envconfig(from = "WEBHOOK_WORKER_REQUEST_TIMEOUT_SECS", default = "10")]
    pub request_timeout_secs: u64,

    /// Defaults to 1 (prefetch=1, §5 "Scheduling": each worker processes one
    /// task at a time); scale out by running more processes.
    #[envconfig(from = "WEBHOOK_WORKER_CONCURRENCY", default = "1")]
    pub concurrency: usize,
}
