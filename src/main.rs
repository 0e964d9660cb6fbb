use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use mongodb::Client;
use splitledger::{api, config::Config, mongo::MongoStore, LedgerStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    tracing::info!("Using database {}", config.database);

    let client = match Client::with_uri_str(&config.mongodb_uri).await {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("Failed to connect to MongoDB: {:?}", err);
            std::process::exit(1);
        }
    };
    let mongo = MongoStore::new(&client, &config.database);
    if let Err(err) = mongo.ensure_indexes().await {
        tracing::error!("Failed to create indexes: {}", err);
        std::process::exit(1);
    }
    tracing::info!("Connected");

    let store: Arc<dyn LedgerStore> = Arc::new(mongo);
    let state = web::Data::new(api::AppState::new(
        store,
        config.auth_secret.clone(),
        config.gateway_webhook_secret.clone(),
    ));

    tracing::info!("Listening on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(config.bind_addr)?
    .run()
    .await
}
