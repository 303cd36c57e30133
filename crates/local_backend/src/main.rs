use clap::Parser;
use local_backend::{
    config::BackendConfig,
    router::router,
    scheduler::spawn_background_workers,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::env::init_tracing();
    let config = BackendConfig::parse();
    tracing::info!(config = ?config, "starting timeseries backend");

    let state = AppState::build(&config).await?;
    spawn_background_workers(state.clone(), config.managed_sites.clone());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!(addr = %config.bind_address(), "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install signal handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
