use std::sync::Arc;

use liaison_relay::{accept_connection, RelayState};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:9001";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("LIAISON_RELAY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let access_token = std::env::var("LIAISON_ACCESS_TOKEN").ok();
    if access_token.as_deref().map_or(true, str::is_empty) {
        info!("LIAISON_ACCESS_TOKEN not set, accepting any token");
    }

    let state = Arc::new(RelayState::with_access_token(access_token));

    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Liaison relay listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);
                tokio::spawn(accept_connection(stream, state.clone()));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
