use bloom_server::config::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let state = bloom_server::build_state(&config).expect("open database");
    if config.seed_demo {
        bloom_server::seed_demo_data(&state.db).expect("seed demo data");
    }

    let app = bloom_server::routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("bind listener");

    tracing::info!(addr = %config.listen_addr, "bloom-server listening");
    axum::serve(listener, app).await.expect("serve");
}
