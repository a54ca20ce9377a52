use anyhow::Context;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_GIGACHAT_URL: &str =
    "https://gigachat.devices.sberbank.ru/api/v1/chat/completions";
const DEFAULT_GIGACHAT_MODEL: &str = "GigaChat";

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub gigachat_api_url: String,
    pub gigachat_auth_key: Option<String>,
    pub gigachat_model: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance")?;

        Ok(Self {
            database_url,
            bind_addr: std::env::var("BIND_ADDR")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            gigachat_api_url: std::env::var("GIGACHAT_API_URL")
                .unwrap_or_else(|_| DEFAULT_GIGACHAT_URL.to_string()),
            gigachat_auth_key: std::env::var("GIGACHAT_AUTH_KEY").ok(),
            gigachat_model: std::env::var("GIGACHAT_MODEL")
                .unwrap_or_else(|_| DEFAULT_GIGACHAT_MODEL.to_string()),
        })
    }

    /// The advisory endpoint needs a credential; everything else works
    /// without one.
    pub fn require_auth_key(&self) -> anyhow::Result<&str> {
        self.gigachat_auth_key
            .as_deref()
            .context("GIGACHAT_AUTH_KEY must be set to serve advisory requests")
    }
}
