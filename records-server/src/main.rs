mod account_controller;
mod appointment_controller;
mod auth_information;
mod auth_middleware;
mod catalog_controller;
mod common_utils;
mod constants;
mod doctor_controller;
mod guards;
mod hospital_controller;
mod identity_client;
mod medical_record_controller;
mod prescription_controller;
mod profile_controller;
mod request_log;
mod storage_controller;

use actix_cors::Cors;
use actix_web::{get, http, web, App, HttpResponse, HttpServer, Responder};
use slog::{error, info, o, Drain, Logger};
use std::sync::Arc;

use common::redis_key::RedisHelper;
use common::server_config::{self, AppConfig};
use common::storage_vendor::StorageVendor;
use database::provider::{MongoProvider, ReferenceStore};

use crate::identity_client::IdentityClient;

fn configure_log() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let console_drain = slog_term::FullFormat::new(decorator).build().fuse();

    // It is used for Synchronization
    let console_drain = slog_async::Async::new(console_drain).build().fuse();

    // Root logger
    Logger::root(console_drain, o!("v"=>env!("CARGO_PKG_VERSION")))
}

// 定义应用状态
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) log: Logger,
    pub(crate) config: AppConfig,
    pub(crate) db: MongoProvider,
    pub(crate) redis_helper: RedisHelper,
    pub(crate) identity: Option<Arc<IdentityClient>>,
    pub(crate) storage: Option<Arc<StorageVendor>>,
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let log = configure_log();

    let config = server_config::load_config();
    let config = match config {
        Ok(config) => {
            info!(log, "Config loaded for {}:{}", config.server.host, config.server.port);
            config
        }
        Err(e) => {
            error!(log, "Error loading config: {:?}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e));
        }
    };

    let db = match MongoProvider::connect(&config.database.url, &config.database.dbname).await {
        Ok(db) => db,
        Err(e) => {
            error!(log, "Failed to connect to the document store: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let redis_helper = RedisHelper::new(&config.redis);
    let identity = config
        .identity
        .clone()
        .map(|cfg| Arc::new(IdentityClient::new(cfg)));
    let storage = config
        .storage
        .clone()
        .map(|cfg| Arc::new(StorageVendor::new(cfg)));

    let server_config = config.server.clone();
    let app_state = AppState {
        log: log.clone(),
        config,
        db,
        redis_helper,
        identity,
        storage,
    };

    if app_state.config.identity.is_some() {
        // 后台任务定时刷新 JWKS
        tokio::spawn(auth_middleware::update_jwks_task(app_state.clone()));
    } else {
        error!(
            log,
            "identity provider is not configured, the API will run UNAUTHENTICATED"
        );
    }

    info!(
        log,
        "Starting the server at {}:{}", server_config.host, server_config.port
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allowed_headers(vec![http::header::AUTHORIZATION, http::header::ACCEPT])
            .allowed_header(http::header::CONTENT_TYPE)
            // 前端需要能读到签发的凭证头
            .expose_headers(vec![constants::TOKEN_HEADER])
            .max_age(3600);
        let cors = match app_state
            .config
            .cors
            .as_ref()
            .and_then(|c| c.allowed_origin.clone())
        {
            Some(origin) => cors.allowed_origin(&origin),
            None => cors.allow_any_origin(),
        };

        let store: Arc<dyn ReferenceStore> = Arc::new(app_state.db.clone());

        App::new()
            .wrap(cors)
            .wrap(request_log::RequestLogger {
                logger: app_state.log.clone(),
            })
            .app_data(web::Data::new(app_state.clone()))
            .service(health)
            .service(account_controller::register)
            .service(account_controller::login)
            .service(
                web::scope("")
                    .wrap(auth_middleware::AuthMiddleware {
                        logger: app_state.log.clone(),
                        redis: app_state.redis_helper.clone(),
                        config: app_state.config.clone(),
                        db: app_state.db.clone(),
                    })
                    .service(account_controller::scope())
                    .service(profile_controller::scope(store.clone()))
                    .service(hospital_controller::scope())
                    .service(doctor_controller::scope())
                    .service(catalog_controller::scope(catalog_controller::CATALOGS[0]))
                    .service(catalog_controller::scope(catalog_controller::CATALOGS[1]))
                    .service(catalog_controller::scope(catalog_controller::CATALOGS[2]))
                    .service(catalog_controller::scope(catalog_controller::CATALOGS[3]))
                    .service(catalog_controller::scope(catalog_controller::CATALOGS[4]))
                    .service(medical_record_controller::scope(store.clone()))
                    .service(prescription_controller::scope(store.clone()))
                    .service(appointment_controller::scope(store.clone()))
                    .service(storage_controller::scope()),
            )
    })
    .bind((server_config.host, server_config.port))?
    .run()
    .await
}
