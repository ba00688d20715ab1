mod config;
mod error;
mod handlers;
mod runtime;

use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use std::sync::Arc;

use config::ServerConfig;
use runtime::{start_ws_gateway, LobbyRuntime};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if it exists (for development)
    if dotenvy::dotenv().is_err() {
        dotenvy::from_filename("server/.env").ok();
    }

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting lobby relay server...");
    log::info!("Protocol version: {}", protocol::PROTOCOL_VERSION);

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "server/config/server.toml".to_string());

    let config = match ServerConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!(
                "Failed to load configuration from '{}': {}. Using defaults.",
                config_path,
                err
            );
            ServerConfig::default()
        }
    };

    let runtime = Arc::new(LobbyRuntime::bootstrap(config));

    let gateway_config = runtime.config().gateway.clone();
    let gateway = match start_ws_gateway(runtime.clone(), &gateway_config.host, gateway_config.port)
        .await
    {
        Ok(handle) => {
            log::info!("WS gateway listening at {}", handle.local_addr());
            handle
        }
        Err(err) => {
            eprintln!("Failed to start WS gateway: {}", err);
            std::process::exit(1);
        }
    };

    let http_config = runtime.config().http.clone();
    log::info!(
        "Starting HTTP server at {}:{}...",
        http_config.host,
        http_config.port
    );

    let runtime_for_app = runtime.clone();
    let http_result = HttpServer::new(move || {
        App::new()
            // Shared state
            .app_data(web::Data::new(runtime_for_app.clone()))
            .app_data(web::Data::new(runtime_for_app.directory().clone()))
            // Middleware
            .wrap(actix_middleware::Logger::default())
            // Ops surface
            .service(handlers::health_check)
            .service(handlers::runtime_rooms)
            // Internal directory endpoints
            .service(handlers::upsert)
            .service(handlers::remove)
            .service(handlers::list_bin)
    })
    .bind((http_config.host.as_str(), http_config.port))?
    .run()
    .await;

    gateway.close();
    if let Err(err) = runtime.shutdown().await {
        log::error!("Runtime shutdown failed: {}", err);
    }

    http_result
}
