use envconfig::Envconfig;
use mailer_common::config::CoreSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Settings {
    #[envconfig(nested = true)]
    pub core: CoreSettings,

    #[envconfig(from = "JANITOR_SWEEP_INTERVAL_SECS", default = "60")]
    pub sweep_interval_secs: u64,

    /// A `queued` job older than this never got its `send_email` task
    /// enqueued (or the broker lost it); the janitor re-enqueues it.
    #[envconfig(from = "JANITOR_STALE_QUEUED_SECS", default = "120")]
    pub stale_queued_secs: i64,

    /// A `processing` job older than this has an owner presumed crashed;
    /// the janitor resets it to `queued` and re-enqueues.
    #[envconfig(from = "JANITOR_STUCK_PROCESSING_SECS", default = "300")]
    pub stuck_processing_secs: i64,
}
