use clap::Parser;
use pong_server::{config::Config, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = config.settings();
    tracing::info!(
        max_matches = settings.max_matches,
        await_timeout = ?settings.await_timeout,
        "Match relay starting"
    );
    let state = AppState::start(settings);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    pong_server::serve(listener, state, config.static_dir.as_deref()).await
}
