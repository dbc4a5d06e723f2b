use envconfig::Envconfig;
use mailer_common::config::CoreSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Settings {
    #[envconfig(nested = true)]
    pub core: CoreSettings,

    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8000")]
    pub bind_addr: String,
}
