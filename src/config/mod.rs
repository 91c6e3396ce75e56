//! Bridge configuration.
//!
//! Configuration comes from environment variables (a `.env` file is
//! loaded first when present). In production every credential must be
//! present or start-up aborts; in development, missing credentials turn
//! the corresponding adapter into a no-op so the bridge can run against
//! partial infrastructure.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("missing required configuration in production: {0}")]
    Missing(&'static str),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn from_env() -> Self {
        match std::env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// All process configuration. Secrets are zeroized on drop.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub log_level: String,
    /// Host the carrier should open the media stream against. Falls back
    /// to the webhook request's Host header when unset.
    pub public_host: Option<String>,

    // LLM
    pub openai_api_key: Option<String>,
    pub realtime_model: String,
    pub realtime_voice: String,

    // Carrier account
    pub carrier_account_sid: Option<String>,
    pub carrier_auth_token: Option<String>,
    pub carrier_number: Option<String>,
    /// Human agent number for carrier-level transfer, when configured.
    pub transfer_number: Option<String>,

    // Order backend
    pub orders_base_url: String,
    pub orders_client_id: Option<String>,
    pub orders_client_secret: Option<String>,
    pub orders_refresh_token: Option<String>,

    // Transcript store (optional)
    pub transcript_store_url: Option<String>,
    pub transcript_store_key: Option<String>,

    // Email gateway (optional)
    pub email_gateway_url: Option<String>,
    pub email_gateway_key: Option<String>,
    pub email_from: String,

    // Shop identity used in prompts and emails
    pub shop_name: String,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match var("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: raw,
            })?,
            None => 3000,
        };

        let config = Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            environment: Environment::from_env(),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            public_host: var("PUBLIC_HOST"),
            openai_api_key: var("OPENAI_API_KEY"),
            realtime_model: var("REALTIME_MODEL")
                .unwrap_or_else(|| "gpt-4o-realtime-preview".to_string()),
            realtime_voice: var("REALTIME_VOICE").unwrap_or_else(|| "alloy".to_string()),
            carrier_account_sid: var("CARRIER_ACCOUNT_SID"),
            carrier_auth_token: var("CARRIER_AUTH_TOKEN"),
            carrier_number: var("CARRIER_NUMBER"),
            transfer_number: var("TRANSFER_NUMBER"),
            orders_base_url: var("ORDERS_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            orders_client_id: var("ORDERS_CLIENT_ID"),
            orders_client_secret: var("ORDERS_CLIENT_SECRET"),
            orders_refresh_token: var("ORDERS_REFRESH_TOKEN"),
            transcript_store_url: var("TRANSCRIPT_STORE_URL"),
            transcript_store_key: var("TRANSCRIPT_STORE_KEY"),
            email_gateway_url: var("EMAIL_GATEWAY_URL"),
            email_gateway_key: var("EMAIL_GATEWAY_KEY"),
            email_from: var("EMAIL_FROM").unwrap_or_else(|| "support@example.com".to_string()),
            shop_name: var("SHOP_NAME").unwrap_or_else(|| "当店".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// In production, a bridge without credentials answers calls it
    /// cannot serve; refuse to start instead.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.environment.is_production() {
            return Ok(());
        }
        if self.openai_api_key.is_none() {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }
        if self.carrier_account_sid.is_none() || self.carrier_auth_token.is_none() {
            return Err(ConfigError::Missing("CARRIER_ACCOUNT_SID / CARRIER_AUTH_TOKEN"));
        }
        if self.orders_client_id.is_none()
            || self.orders_client_secret.is_none()
            || self.orders_refresh_token.is_none()
        {
            return Err(ConfigError::Missing(
                "ORDERS_CLIENT_ID / ORDERS_CLIENT_SECRET / ORDERS_REFRESH_TOKEN",
            ));
        }
        if self.public_host.is_none() {
            return Err(ConfigError::Missing("PUBLIC_HOST"));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn identification_enabled(&self) -> bool {
        self.orders_client_id.is_some()
            && self.orders_client_secret.is_some()
            && self.orders_refresh_token.is_some()
    }

    pub fn transcripts_enabled(&self) -> bool {
        self.transcript_store_url.is_some() && self.transcript_store_key.is_some()
    }

    pub fn email_enabled(&self) -> bool {
        self.email_gateway_url.is_some() && self.email_gateway_key.is_some()
    }
}

impl Drop for BridgeConfig {
    fn drop(&mut self) {
        for secret in [
            &mut self.openai_api_key,
            &mut self.carrier_auth_token,
            &mut self.orders_client_secret,
            &mut self.orders_refresh_token,
            &mut self.transcript_store_key,
            &mut self.email_gateway_key,
        ] {
            if let Some(value) = secret.as_mut() {
                value.zeroize();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BridgeConfig {
        BridgeConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            log_level: "info".to_string(),
            public_host: None,
            openai_api_key: None,
            realtime_model: "gpt-4o-realtime-preview".to_string(),
            realtime_voice: "alloy".to_string(),
            carrier_account_sid: None,
            carrier_auth_token: None,
            carrier_number: None,
            transfer_number: None,
            orders_base_url: "http://localhost:8080".to_string(),
            orders_client_id: None,
            orders_client_secret: None,
            orders_refresh_token: None,
            transcript_store_url: None,
            transcript_store_key: None,
            email_gateway_url: None,
            email_gateway_key: None,
            email_from: "support@example.com".to_string(),
            shop_name: "サンプルストア".to_string(),
        }
    }

    #[test]
    fn development_tolerates_missing_credentials() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn production_requires_credentials() {
        let mut config = base_config();
        config.environment = Environment::Production;
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        config.openai_api_key = Some("sk-test".to_string());
        config.carrier_account_sid = Some("AC00".to_string());
        config.carrier_auth_token = Some("token".to_string());
        config.orders_client_id = Some("id".to_string());
        config.orders_client_secret = Some("secret".to_string());
        config.orders_refresh_token = Some("refresh".to_string());
        config.public_host = Some("bridge.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn feature_flags_track_credential_presence() {
        let mut config = base_config();
        assert!(!config.identification_enabled());
        assert!(!config.transcripts_enabled());
        assert!(!config.email_enabled());

        config.orders_client_id = Some("id".to_string());
        config.orders_client_secret = Some("secret".to_string());
        config.orders_refresh_token = Some("refresh".to_string());
        assert!(config.identification_enabled());
    }
}
