// src/config.rs
use crate::balance;
use serde::Deserialize;

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> u64 {
    5_000
}

fn default_signup_grant() -> i64 {
    balance::SIGNUP_GRANT
}

fn default_history_cache_capacity() -> u64 {
    10_000
}

fn default_history_cache_ttl_secs() -> u64 {
    30
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub payment_key_id: String,
    pub payment_key_secret: String,
    pub payment_api_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_signup_grant")]
    pub signup_grant: i64,
    #[serde(default = "default_history_cache_capacity")]
    pub history_cache_capacity: u64,
    #[serde(default = "default_history_cache_ttl_secs")]
    pub history_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.trim().is_empty() {
            return Err("JWT_SECRET must not be empty".into());
        }
        if self.max_connections == 0 {
            return Err("MAX_CONNECTIONS must be at least 1".into());
        }
        if self.history_cache_ttl_secs == 0 {
            return Err("HISTORY_CACHE_TTL_SECS must be at least 1".into());
        }
        if self.signup_grant < 0 {
            return Err("SIGNUP_GRANT must not be negative".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/skillswap".into(),
            jwt_secret: "secret".into(),
            payment_key_id: "key".into(),
            payment_key_secret: "key-secret".into(),
            payment_api_url: "http://localhost:9000".into(),
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            statement_timeout_ms: default_statement_timeout_ms(),
            signup_grant: default_signup_grant(),
            history_cache_capacity: default_history_cache_capacity(),
            history_cache_ttl_secs: default_history_cache_ttl_secs(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config().validate().is_ok());
        assert_eq!(config().signup_grant, 100);
    }

    #[test]
    fn empty_secret_is_rejected() {
        let mut cfg = config();
        cfg.jwt_secret = "  ".into();
        assert!(cfg.validate().is_err());
    }
}
