use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub api_base_url: String,
    pub ws_url: String,
    pub backend_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub event_buffer_size: usize,
    pub delivery_fee_rate: f64,
    pub fallback_delivery_fee: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        let api_base_url =
            env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8090".to_string());
        let ws_url =
            env::var("WS_URL").unwrap_or_else(|_| "ws://localhost:8090/ws/websocket".to_string());

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            api_base_url,
            ws_url,
            backend_timeout_secs: parse_or_default("BACKEND_TIMEOUT_SECS", 10)?,
            refresh_interval_secs: parse_or_default("REFRESH_INTERVAL_SECS", 60)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            delivery_fee_rate: parse_or_default("DELIVERY_FEE_RATE", 0.10)?,
            fallback_delivery_fee: parse_or_default("FALLBACK_DELIVERY_FEE", 5000.0)?,
        };

        if config.refresh_interval_secs == 0 {
            return Err(AppError::Internal(
                "REFRESH_INTERVAL_SECS must be > 0".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
