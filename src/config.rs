use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub grpc_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub reminder_interval_secs: u64,
    /// Local offset applied for order-number date prefixes and
    /// daily-collection bucketing.
    pub utc_offset_minutes: i32,
    pub max_receipt_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            grpc_port: parse_or_default("GRPC_PORT", 50051)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            reminder_interval_secs: parse_or_default("REMINDER_INTERVAL_SECS", 3600)?,
            utc_offset_minutes: parse_or_default("UTC_OFFSET_MINUTES", 0)?,
            max_receipt_bytes: parse_or_default("MAX_RECEIPT_BYTES", 5 * 1024 * 1024)?,
        })
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
