use envconfig::Envconfig;
use mailer_common::config::CoreSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Settings {
    #[envconfig(nested = true)]
    pub core: CoreSettings,

    /// How long to wait between empty polls of the `email_delivery` queue.
    #[envconfig(from = "WORKER_POLL_INTERVAL_MS", default = "500")]
    pub poll_interval_ms: u64,

    /// How long a dequeued task stays invisible before it's considered lost
    /// and redelivered (§4.2 "visibility timeout 120s", §5 "Cancellation &
    /// timeouts").
    #[envconfig(from = "WORKER_VISIBILITY_TIMEOUT_SECS", default = "120")]
    pub visibility_timeout_secs: i64,

    /// A job stuck in `processing` longer than this is assumed abandoned by
    /// a crashed worker and is eligible for reclaiming (§4.2 step 3, "< 2
    /// min").
    #[envconfig(from = "WORKER_STALE_PROCESSING_SECS", default = "120")]
    pub stale_processing_secs: i64,

    /// Maximum number of jobs processed concurrently by one worker process.
    /// Defaults to 1 (prefetch=1, §4.2 "Scheduling model": one in-flight
    /// task per worker, bounding memory and keeping per-job lock contention
    /// to a single owner at a time); scale out by running more processes,
    /// not by raising this.
    #[envconfig(from = "WORKER_CONCURRENCY", default = "1")]
    pub concurrency: usize,

    /// Exit cleanly after this many tasks so the process supervisor recycles
    /// the worker, bounding the lifetime of any per-connection SMTP state
    /// (§9 "Worker pool recycling"). `0` disables recycling.
    #[envconfig(from = "WORKER_MAX_TASKS_BEFORE_RECYCLE", default = "0")]
    pub max_tasks_before_recycle: u64,
}
