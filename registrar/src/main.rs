//! Registrar HTTP server.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use registrar::aggregates::{RegistrationEnvironment, RegistrationReducer};
use registrar::api::{self, AppState};
use registrar::config::Config;
use registrar::gateway::{HttpGateway, MockGateway, PaymentGateway};
use registrar::policy::CancellationPolicy;
use registrar::types::RegistrarState;
use registrar_core::environment::SystemClock;
use registrar_runtime::{RetryPolicy, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let gateway: Arc<dyn PaymentGateway> = if config.gateway_base_url.is_empty() {
        info!("No gateway configured; using the in-memory mock");
        Arc::new(MockGateway::new())
    } else {
        Arc::new(
            HttpGateway::new(
                config.gateway_base_url.clone(),
                config.gateway_api_key.clone(),
                config.gateway_timeout,
                RetryPolicy::new().with_max_attempts(3),
            )
            .context("building gateway client")?,
        )
    };

    let environment = RegistrationEnvironment {
        clock: Arc::new(SystemClock),
        gateway,
        policy: CancellationPolicy::new(config.cancellation_cutoff_days),
    };

    let store = Store::new(RegistrarState::new(), RegistrationReducer::new(), environment);
    let state = AppState {
        store,
        webhook_secret: Arc::from(config.webhook_secret.as_str()),
    };

    let app = api::router(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(addr = %addr, "Registrar listening");
    axum::serve(listener, app).await.context("serving")?;

    Ok(())
}
