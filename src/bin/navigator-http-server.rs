// Standalone HTTP server for the forensic audit service.
// Use: cargo run --bin navigator-http-server

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use claim_navigator::http_server::{self, AppState};
use claim_navigator::{
    ForensicConfig, OpenAiCompletionClient, RateClient, ScrubEngine, ServiceConfig, SessionDeps,
    SessionRegistry,
};

/// Try to bind to a port, returning the actual port used
async fn try_bind_port(start_port: u16) -> u16 {
    let mut port = start_port;
    for _ in 0..10 {
        match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await {
            Ok(listener) => {
                // Successfully bound, drop the listener so the server can use it
                drop(listener);
                return port;
            }
            Err(_) => {
                tracing::warn!("Port {} is in use, trying {}...", port, port + 1);
                port += 1;
            }
        }
    }
    // Return the last tried port, let the server fail with a clear message
    port
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("claim_navigator=info")),
        )
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    // Fail closed: no de-identification key, no server.
    let scrubber = match ScrubEngine::new(&config.scrub_key) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let forensic = Arc::new(ForensicConfig::default());
    let deps = SessionDeps {
        scrubber: scrubber.clone(),
        completion: Arc::new(OpenAiCompletionClient::new(
            config.completion_base_url.clone(),
            config.completion_api_key.clone(),
        )),
        rates: Arc::new(RateClient::new(
            config.pricing_endpoint.clone(),
            config.pricing_api_key.clone(),
        )),
        forensic: forensic.clone(),
        default_model: config.default_model.clone(),
    };

    let state = AppState {
        registry: Arc::new(SessionRegistry::new(deps)),
        scrubber,
        config: forensic,
    };

    let port = try_bind_port(config.port).await;
    tracing::info!("Claim Navigator HTTP server");
    tracing::info!("API: http://localhost:{}/api", port);
    tracing::info!("Health: http://localhost:{}/api/health", port);

    http_server::run_http_server(state, port).await;
}
