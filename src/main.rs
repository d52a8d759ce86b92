use secure_auth::clock::SystemClock;
use secure_auth::configuration::get_configuration;
use secure_auth::routes::CookieSettings;
use secure_auth::service::AuthService;
use secure_auth::startup::run;
use secure_auth::store::PostgresStore;
use secure_auth::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .acquire_timeout(configuration.auth.persistence_timeout())
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
    })?;

    tracing::info!("Database connection pool ready");

    let auth = AuthService::new(
        Arc::new(PostgresStore::new(pool)),
        &configuration.auth,
        Arc::new(SystemClock),
    );
    let cookies = CookieSettings {
        secure: configuration.application.secure_cookies,
        access_max_age: configuration.auth.access_token_expiry,
        refresh_max_age: configuration.auth.refresh_token_expiry,
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, auth, cookies)?.await
}
