use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{Compress, DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteConnectOptions, Sqlite, SqlitePool};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod allocation;
mod allocation_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod indent_handlers;
mod intake_handlers;
mod kvstore;
mod ledger;
mod models;
mod naming;
mod request_handlers;
mod stock;
mod stock_handlers;

use config::{load_config, Config};
use handlers::{get_dashboard_stats, health_check};
use kvstore::{InMemoryKvStore, KvStore};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub cache: Arc<dyn KvStore>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    setup_logging(&config)?;

    if env::var("LABSTORES_ENV").as_deref() == Ok("production") {
        validate_production_config(&config)?;
    }

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    if env::var("RESET_DATABASE").as_deref() == Ok("true") {
        if env::var("LABSTORES_ENV").as_deref() == Ok("production") {
            anyhow::bail!("RESET_DATABASE is not allowed in production");
        }
        db::reset_database(&pool).await?;
    }

    let cache: Arc<dyn KvStore> =
        Arc::new(InMemoryKvStore::new(config.cache.ttl_seconds.max(0) as u64));

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
        cache,
    });

    config.print_startup_info();
    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let workers = config.server.workers;
    let keep_alive = config.server.keep_alive;
    let client_timeout = config.server.client_timeout;

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .app_data(web::Data::new(app_state.clone()))
            .service(
                web::scope("/health").route("", web::get().to(health_check)),
            )
            .service(
                web::scope("/api/v1")
                    .route("/dashboard/stats", web::get().to(get_dashboard_stats))
                    .service(
                        web::scope("/stock")
                            .route("/labs/{lab_id}", web::get().to(stock_handlers::get_lab_stock))
                            .route("/masters", web::get().to(stock_handlers::list_item_masters))
                            .route("/distribution", web::get().to(stock_handlers::lab_distribution))
                            .route("/expired", web::get().to(intake_handlers::list_expired_lots))
                            .route("/expired-log", web::get().to(intake_handlers::list_expired_log))
                            .route("/expired/{lot_id}", web::post().to(intake_handlers::expired_lot_action)),
                    )
                    .service(
                        web::scope("/out-of-stock")
                            .route("", web::get().to(stock_handlers::list_out_of_stock)),
                    )
                    .service(
                        web::scope("/transactions")
                            .route("", web::get().to(stock_handlers::list_ledger_entries)),
                    )
                    .service(
                        web::scope("/intake")
                            .route("", web::post().to(intake_handlers::intake_items)),
                    )
                    .service(
                        web::scope("/allocations")
                            .route("", web::post().to(allocation_handlers::allocate_to_lab)),
                    )
                    .service(
                        web::scope("/equipment")
                            .route("", web::get().to(allocation_handlers::list_equipment))
                            .route("", web::post().to(allocation_handlers::register_equipment))
                            .route("/issue", web::post().to(allocation_handlers::issue_equipment))
                            .route("/return", web::post().to(allocation_handlers::return_equipment)),
                    )
                    .service(
                        web::scope("/indents")
                            .route("", web::get().to(indent_handlers::list_indents))
                            .route("/lab", web::post().to(indent_handlers::create_lab_indent))
                            .route("/draft", web::post().to(indent_handlers::create_draft_indent))
                            .route("/{id}", web::get().to(indent_handlers::get_indent))
                            .route("/{id}/lines", web::post().to(indent_handlers::add_draft_line))
                            .route("/{id}/lines/{line_id}", web::put().to(indent_handlers::update_draft_line))
                            .route("/{id}/submit", web::post().to(indent_handlers::submit_draft))
                            .route("/{id}/comments", web::post().to(indent_handlers::add_comment))
                            .route("/{id}/decision", web::post().to(indent_handlers::decide_lab_indent))
                            .route("/{id}/central-decision", web::post().to(indent_handlers::decide_central_indent))
                            .route("/{id}/fulfill-remaining", web::post().to(indent_handlers::fulfill_remaining)),
                    )
                    .service(
                        web::scope("/requests")
                            .route("", web::get().to(request_handlers::list_requests))
                            .route("", web::post().to(request_handlers::create_request))
                            .route("/{id}", web::get().to(request_handlers::get_request))
                            .route("/{id}/decision", web::post().to(request_handlers::approve_request))
                            .route("/{id}/fulfill-remaining", web::post().to(request_handlers::fulfill_remaining)),
                    ),
            )
    })
    .keep_alive(Duration::from_secs(keep_alive))
    .client_request_timeout(Duration::from_millis(client_timeout))
    .bind(&bind_address)?;

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server.run().await?;
    Ok(())
}

pub fn setup_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .allowed_header("X-Actor-Id")
        .max_age(3600);

    let is_production = env::var("LABSTORES_ENV").as_deref() == Ok("production");

    if allowed_origins.contains(&"*".to_string()) {
        if is_production {
            panic!("Cannot start server with wildcard CORS in production");
        }
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin().allow_any_header().allow_any_method();
    } else {
        for origin in allowed_origins {
            if origin.is_empty() {
                continue;
            }
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    // `log` macros go through env_logger; `tracing` macros through the
    // subscriber below.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.logging.level.as_str();
        tracing_subscriber::EnvFilter::new(level)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.contains(&"*".to_string()) {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)?
        .busy_timeout(Duration::from_millis(db_config.busy_timeout_ms))
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn setup_security_headers(security: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if security.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload",
        ));
    }

    headers
}
