//! Binary entrypoint: load configuration, build a `Services` composition
//! root, and serve the operations HTTP/SSE surface. Logging setup follows
//! the teacher's `tracing_subscriber::fmt().with_env_filter(...)` style in
//! `main.rs`, scoped to this crate's own module path.

use std::sync::Arc;

use jab_core::config::Config;
use jab_core::organizer::sweep_stale_tmp_files;
use jab_core::services::Services;
use jab_core::store::{SqliteStore, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy("jab_core=info,sqlx=warn,hyper=warn"),
        )
        .init();

    let config = Config::load().expect("failed to load configuration");

    let database_path = config
        .library_path()
        .join(".jab.sqlite3")
        .to_string_lossy()
        .to_string();
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&database_path)
            .await
            .expect("failed to connect to the database"),
    );

    if let Err(err) = sweep_stale_tmp_files(&config.library_root).await {
        tracing::warn!(error = %err, "startup stale-tmp sweep failed");
    }

    let services = Services::new(config, store);
    services.spawn_queue_sweep();

    let app = jab_core::api::router(services);
    let listener = tokio::net::TcpListener::bind("0.0.0.0:7878")
        .await
        .expect("failed to bind operations API listener");

    tracing::info!(addr = "0.0.0.0:7878", "operations API listening");
    axum::serve(listener, app)
        .await
        .expect("operations API server exited unexpectedly");
}
