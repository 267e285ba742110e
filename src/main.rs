use std::net::SocketAddr;
use std::sync::Arc;

use todo_sync::application::session::SessionTracker;
use todo_sync::application::sync::SyncService;
use todo_sync::http::routes::{auth, tasks};
use todo_sync::http::routing;
use todo_sync::infrastructure::sqlite_auth::SqliteAuthGateway;
use todo_sync::infrastructure::sqlite_store::SqliteTaskStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://todos.db".to_string());
    // Ensure the SQLite file can be created when using a file-backed URL
    prepare_sqlite_file(&database_url)?;

    let store = Arc::new(SqliteTaskStore::connect(&database_url).await?);
    store.init().await?;
    let gateway = Arc::new(SqliteAuthGateway::connect(&database_url).await?);
    gateway.init().await?;

    let session = SessionTracker::new(gateway);
    let sync = Arc::new(SyncService::start(store, session.observe()));

    let router = routing::app(
        auth::router(auth::AuthState { session: session.clone() })
            .merge(tasks::router(tasks::TasksState { sync: sync.clone() })),
    );

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let addr: SocketAddr = bind.parse()?;
    tracing::info!(%addr, "listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release the live subscription on the way out.
    sync.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::ctrl_c;
    let _ = ctrl_c().await;
    tracing::info!("shutdown");
}

fn prepare_sqlite_file(database_url: &str) -> anyhow::Result<()> {
    if database_url.starts_with("sqlite::memory:") {
        return Ok(());
    }
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        use std::fs::{self, OpenOptions};
        use std::path::Path;
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !p.exists() {
            let _ = OpenOptions::new().create(true).append(true).open(p)?;
        }
    }
    Ok(())
}
