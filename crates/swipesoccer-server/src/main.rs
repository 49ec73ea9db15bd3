use tracing_subscriber::EnvFilter;

use swipesoccer_server::config::ServerConfig;
use swipesoccer_server::{build_app, spawn_idle_sweeper, spawn_presence_listener};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("SWIPESOCCER_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }
    let addr = config.listen_addr.clone();

    let (app, state) = build_app(config);
    spawn_presence_listener(state.clone());
    spawn_idle_sweeper(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!("Swipe Soccer server listening on {addr}");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
