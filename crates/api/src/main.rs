//! Helpdesk realtime API server

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use helpdesk_api::{
    broker::{BridgeState, Broker},
    create_router, AmqpBroker, AppState, BrokerBridge, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    let state = AppState::new(config);

    // Broker trouble degrades realtime delivery but never keeps the server down
    match AmqpBroker::connect(&state.config.rabbitmq_url, &state.config.realtime_exchange).await {
        Ok(broker) => {
            let broker: Arc<dyn Broker> = Arc::new(broker);
            BrokerBridge::from_config(
                &state.config,
                Arc::clone(&state.registry),
                state.bridge_status.clone(),
            )
            .spawn(broker);
        }
        Err(e) => {
            state.bridge_status.set(BridgeState::Disabled);
            tracing::warn!(error = %e, "RabbitMQ unavailable; realtime delivery disabled");
        }
    }

    let bind_address = state.config.bind_address.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    tracing::info!(address = %bind_address, "Helpdesk API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "helpdesk_api=debug,tower_http=info,info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
