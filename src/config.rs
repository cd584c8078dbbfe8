use std::{env, net::SocketAddr};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub cookie_secret: String,
    pub geocoding_base_url: String,
    pub geocoding_api_key: String,
    pub ai_base_url: String,
    pub ai_api_key: String,
    pub ai_daily_limit: i64,
    /// Anything except "production" serves the mock suggestion list.
    pub environment: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://triplist.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-super-secret-triplist-cookie".to_string());

        let geocoding_base_url = env::var("GEOCODING_BASE_URL")
            .unwrap_or_else(|_| "https://maps.googleapis.com".to_string());
        let geocoding_api_key = env::var("GEOCODING_API_KEY").unwrap_or_default();

        let ai_base_url = env::var("AI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
        let ai_api_key = env::var("AI_API_KEY").unwrap_or_default();
        let ai_daily_limit = env::var("AI_SUGGESTION_DAILY_LIMIT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid AI_SUGGESTION_DAILY_LIMIT: {err}")))?;

        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            database_url,
            listen_addr,
            cookie_secret,
            geocoding_base_url,
            geocoding_api_key,
            ai_base_url,
            ai_api_key,
            ai_daily_limit,
            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
