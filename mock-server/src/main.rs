use mock_server::ServerConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8500".to_string());
    let mut config = ServerConfig::default();
    if let Ok(dc) = std::env::var("DATACENTER") {
        config.datacenter = dc;
    }
    config.acl_token = std::env::var("ACL_TOKEN").ok().filter(|token| !token.is_empty());

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, datacenter = %config.datacenter, acl = config.acl_token.is_some(), "listening");
    mock_server::run_with(listener, config).await
}
