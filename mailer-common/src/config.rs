//! Settings loaded once from the environment at process start (§9 "Global
//! mutable state") and threaded through constructors from `main`. Shared by
//! every binary in the workspace via `#[envconfig(nested = true)]`.

use envconfig::Envconfig;

use crate::crypto::WrapKey;

#[derive(Envconfig, Clone, Debug)]
pub struct CoreSettings {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "DATABASE_MAX_CONNECTIONS", default = "10")]
    pub database_max_connections: u32,

    /// Base64-encoded 32-byte AES-256 key used to wrap/unwrap SMTP
    /// passwords at rest.
    #[envconfig(from = "CREDENTIAL_WRAP_KEY")]
    pub credential_wrap_key: String,
}

impl CoreSettings {
    pub fn wrap_key(&self) -> anyhow::Result<WrapKey> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let raw = BASE64
            .decode(&self.credential_wrap_key)
            .map_err(|e| anyhow::anyhow!("CREDENTIAL_WRAP_KEY is not valid base64: {e}"))?;

        let key_bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| anyhow::anyhow!("CREDENTIAL_WRAP_KEY must decode to exactly 32 bytes"))?;

        Ok(WrapKey::new(&key_bytes))
    }
}
