// src/lib.rs
use actix_web::web;
use std::sync::Arc;
use std::time::Duration;

pub mod auth;
pub mod balance;
pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod payments;
pub mod settlement;
pub mod store;
pub mod wallet;

use cache::HistoryCache;
use config::Config;
use notify::BroadcastNotifier;
use payments::{PaymentGateway, PaymentService};
use settlement::SettlementEngine;
use store::LedgerStore;

/// Shared by every handler through `web::Data`.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LedgerStore>,
    pub engine: SettlementEngine,
    pub payments: PaymentService,
    pub notifier: Arc<BroadcastNotifier>,
    /// First history page per user; invalidated whenever a balance moves.
    pub history_cache: HistoryCache,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let notifier = Arc::new(BroadcastNotifier::default());
        let engine = SettlementEngine::new(store.clone(), notifier.clone());
        let payments = PaymentService::new(
            store.clone(),
            gateway,
            config.payment_key_secret.clone(),
        );
        let history_cache = HistoryCache::new(
            config.history_cache_capacity,
            Duration::from_secs(config.history_cache_ttl_secs),
        );

        Self {
            config,
            store,
            engine,
            payments,
            notifier,
            history_cache,
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    auth::init_routes(cfg);
    wallet::init_routes(cfg);
    payments::init_routes(cfg);
}
