//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;

use crate::chat::DeliveryMode;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream generation backend configuration
    pub upstream: UpstreamConfig,
    /// How the bridge delivers generated text to the client
    pub delivery_mode: DeliveryMode,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Upstream generation backend configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// API key for the Gemini API (empty when not configured)
    pub api_key: String,
    /// Model name to request (e.g., "gemini-2.5-flash")
    pub model: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(3001),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            upstream: UpstreamConfig {
                api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            },
            delivery_mode: match env::var("CHAT_DELIVERY_MODE").as_deref() {
                Ok("batch") => DeliveryMode::Batch,
                _ => DeliveryMode::Incremental,
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
