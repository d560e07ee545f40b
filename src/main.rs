// src/main.rs
use actix_web::{App, HttpServer, middleware::Logger, web};
use skillswap_ledger::config::Config;
use skillswap_ledger::payments::HttpPaymentGateway;
use skillswap_ledger::store::PgStore;
use skillswap_ledger::{AppState, configure};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    tracing::info!("Starting skillswap ledger service");

    dotenv::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    config.validate().expect("Invalid configuration");

    let store = PgStore::connect(&config)
        .await
        .expect("Failed to connect to Postgres");

    let gateway = HttpPaymentGateway::new(
        config.payment_api_url.clone(),
        config.payment_key_id.clone(),
        config.payment_key_secret.clone(),
    );

    let bind_address = config.bind_address.clone();
    let state = web::Data::new(AppState::new(config, Arc::new(store), Arc::new(gateway)));

    tracing::info!("Listening on {}", bind_address);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind(bind_address)?
    .run()
    .await
}
