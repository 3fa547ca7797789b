use std::time::Duration;

use anyhow::{Context, Result};

use crate::classifier::client::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::classifier::ClassifierSettings;

const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 10;

/// Application configuration loaded from environment variables.
/// Only malformed values are fatal; missing optional services degrade.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent: rows live in memory and are lost on restart.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Absent: every submission is held for counselor review.
    pub classifier_api_key: Option<String>,
    pub classifier_api_url: String,
    pub classifier_model: String,
    pub classifier_timeout: Duration,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            database_max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u32>()
                .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?,
            classifier_api_key: optional_env("CLASSIFIER_API_KEY"),
            classifier_api_url: optional_env("CLASSIFIER_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            classifier_model: optional_env("CLASSIFIER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            classifier_timeout: Duration::from_secs(
                std::env::var("CLASSIFIER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| DEFAULT_CLASSIFIER_TIMEOUT_SECS.to_string())
                    .parse::<u64>()
                    .context("CLASSIFIER_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            api_key: self.classifier_api_key.clone(),
            api_url: self.classifier_api_url.clone(),
            model: self.classifier_model.clone(),
            timeout: self.classifier_timeout,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
