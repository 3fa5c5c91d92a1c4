use std::time::Duration;

use actix_web::{App, HttpServer, middleware::Logger, web};
use clap::Parser;
use config::Config;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use vigil::{
    api,
    middleware::{auth::Authentication, csrf::CsrfProtection, rate_limit::RateLimiter},
    model::common::{AppState, MIN_SECRET_BYTES},
    service,
};

use tracing::{Subscriber, subscriber::set_global_default};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, fmt::MakeWriter, layer::SubscriberExt};

#[derive(Parser)]
#[command()]
struct Cli {
    #[arg(short = 'm', long = "mode", default_value = "development")]
    mode: String,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let subscriber = get_subscriber("vigil", "info", std::io::stdout);
    init_subscriber(subscriber);

    let mut config_builder = Config::builder();

    config_builder =
        config_builder.add_source(config::File::with_name("conf/application").required(false));
    config_builder = config_builder.set_override("vigil.mode", args.mode)?;

    if let Ok(url) = std::env::var("DATABASE_URL") {
        config_builder = config_builder.set_override("db.url", url)?;
    }
    if let Ok(secret) = std::env::var("SESSION_SECRET") {
        config_builder = config_builder.set_override("auth.token.secret", secret)?;
    }
    if let Ok(poll_ms) = std::env::var("WORKER_POLL_MS") {
        config_builder = config_builder.set_override("worker.pollMs", poll_ms)?;
    }
    if let Ok(poll_ms) = std::env::var("REALTIME_POLL_MS") {
        config_builder = config_builder.set_override("realtime.pollMs", poll_ms)?;
    }

    let app_config = config_builder.build()?;

    let token_secret_key = app_config.get_string("auth.token.secret")?;
    if token_secret_key.len() < MIN_SECRET_BYTES {
        return Err(format!(
            "auth.token.secret must be at least {} bytes",
            MIN_SECRET_BYTES
        )
        .into());
    }

    let max_connections = app_config
        .get_int("db.pool.maximumPoolSize")
        .unwrap_or(100) as u32;
    let min_connections = app_config.get_int("db.pool.minimumPoolSize").unwrap_or(1) as u32;
    let connect_timeout = app_config.get_int("db.pool.connectionTimeout").unwrap_or(30) as u64;
    let acquire_timeout = app_config.get_int("db.pool.acquireTimeout").unwrap_or(8) as u64;
    let idle_timeout = app_config.get_int("db.pool.idleTimeout").unwrap_or(10) as u64;
    let max_lifetime = app_config.get_int("db.pool.maxLifetime").unwrap_or(30) as u64;

    let url = app_config.get_string("db.url")?;

    let mut opt = ConnectOptions::new(url);

    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(Duration::from_secs(connect_timeout))
        .acquire_timeout(Duration::from_secs(acquire_timeout))
        .idle_timeout(Duration::from_secs(idle_timeout))
        .max_lifetime(Duration::from_secs(max_lifetime));

    let database_connection: DatabaseConnection = Database::connect(opt).await?;

    let address = app_config
        .get_string("server.address")
        .unwrap_or("0.0.0.0".to_string());
    let server_port = app_config.get_int("server.port").unwrap_or(8080) as u16;

    let app_state = AppState {
        app_config,
        database_connection: database_connection.clone(),
        token_secret_key,
    };

    let worker_config = service::job::WorkerConfig {
        poll_interval: Duration::from_millis(app_state.worker_poll_ms()),
        batch_size: app_state.worker_batch_size(),
    };
    tokio::spawn(service::job::run(database_connection, worker_config));

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(RateLimiter::with_defaults())
            .wrap(CsrfProtection)
            .wrap(Authentication)
            .app_data(web::Data::new(app_state.clone()))
            .service(api::router::routers())
    })
    .bind((address, server_port))?
    .run()
    .await?;

    Ok(())
}

pub fn get_subscriber(
    name: &str,
    env_filter: &str,
    sink: impl for<'a> MakeWriter<'a> + 'static + Send + Sync,
) -> impl Subscriber + Send + Sync {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(name.into(), sink);

    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}
