mod config;
mod error;
mod inference;
mod registry;
mod routes;
mod validation;
mod vision;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use config::AppConfig;
use registry::ModelRegistry;
use routes::{BodyLimit, configure_routes, error_handlers};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let registry = web::Data::new(ModelRegistry::load(&config));
    let anxiety_config = web::Data::new(config.anxiety.clone());
    let payload_limit = config.server.payload_limit;
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(error_handlers())
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::PayloadConfig::new(payload_limit))
            .app_data(web::Data::new(BodyLimit(payload_limit)))
            .app_data(registry.clone())
            .app_data(anxiety_config.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
