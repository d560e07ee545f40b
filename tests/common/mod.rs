#![allow(dead_code)]

use async_trait::async_trait;
use skillswap_ledger::config::Config;
use skillswap_ledger::error::PaymentError;
use skillswap_ledger::payments::{GatewayOrder, PaymentGateway};
use std::sync::atomic::{AtomicU32, Ordering};

pub const KEY_SECRET: &str = "test-key-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Hands out sequential order ids without network access.
#[derive(Default)]
pub struct StubGateway {
    next: AtomicU32,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder, PaymentError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder {
            id: format!("order_stub_{n}"),
            amount: amount_minor,
            currency: currency.to_string(),
        })
    }
}

pub fn config() -> Config {
    Config {
        database_url: "postgres://localhost/skillswap_test".into(),
        jwt_secret: JWT_SECRET.into(),
        payment_key_id: "key".into(),
        payment_key_secret: KEY_SECRET.into(),
        payment_api_url: "http://localhost:9000".into(),
        bind_address: "127.0.0.1:0".into(),
        max_connections: 1,
        statement_timeout_ms: 5_000,
        signup_grant: 100,
        history_cache_capacity: 100,
        history_cache_ttl_secs: 30,
    }
}
